//! Receiver controller
//!
//! [`Receiver::new`] returns two handles onto one receiver instance:
//!
//! - an [`EdgeHandler`], owned by the pin interrupt binding, which runs the
//!   whole decoding pipeline and is the only writer of the packet queue
//!   and the statistics;
//! - the [`Receiver`] itself, used from normal context to start and stop
//!   reception, dequeue packets and read statistics.
//!
//! The only state they share is the packet queue, the counters and two
//! control words. Start and stop requests reach the interrupt path at its
//! next edge.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::ReceiverConfig;
use crate::crc::CrcValidator;
use crate::decoder::{Decoder, FrameOutcome};
use crate::edge::EdgeEvent;
use crate::error::{FrameError, Result};
use crate::frame::FrameState;
use crate::packet::Packet;
use crate::queue::PacketQueue;
use crate::stats::{Counters, Statistics};

/// Outcome of [`Receiver::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStatus {
    /// Reception started
    Started,
    /// The receiver was already running; nothing changed
    AlreadyRunning,
}

#[derive(Debug)]
struct Shared {
    queue: PacketQueue,
    counters: Counters,
    running: AtomicBool,
    generation: AtomicU32,
}

/// Consumer-side handle: control, packets and statistics
#[derive(Debug)]
pub struct Receiver {
    shared: Arc<Shared>,
    validator: CrcValidator,
    config: ReceiverConfig,
}

/// Interrupt-side handle: feed it every edge of the bus line
#[derive(Debug)]
pub struct EdgeHandler {
    decoder: Decoder,
    shared: Arc<Shared>,
    generation: u32,
    surface_invalid_packets: bool,
}

impl Receiver {
    /// Create a stopped receiver and its edge handler
    ///
    /// All buffers are allocated here; nothing on the edge path allocates.
    pub fn new(config: ReceiverConfig) -> Result<(Receiver, EdgeHandler)> {
        config.validate()?;
        log::debug!(
            "creating VAN receiver: bit period {:?}, tolerance {}, queue {} ({:?})",
            config.nominal_bit_period,
            config.timing_tolerance,
            config.queue_capacity,
            config.overflow_policy
        );

        let shared = Arc::new(Shared {
            queue: PacketQueue::new(config.queue_capacity, config.overflow_policy),
            counters: Counters::new(),
            running: AtomicBool::new(false),
            generation: AtomicU32::new(0),
        });

        let handler = EdgeHandler {
            decoder: Decoder::new(&config),
            shared: Arc::clone(&shared),
            generation: 0,
            surface_invalid_packets: config.surface_invalid_packets,
        };

        let receiver = Receiver {
            shared,
            validator: CrcValidator::new(config.format.crc),
            config,
        };

        Ok((receiver, handler))
    }

    /// Begin decoding edges
    ///
    /// The edge handler drops whatever frame it was assembling and waits
    /// for the next idle gap; statistics are cleared. Queued packets are
    /// kept.
    pub fn start(&self) -> StartStatus {
        if self.shared.running.load(Ordering::Acquire) {
            log::debug!("VAN receiver already running");
            return StartStatus::AlreadyRunning;
        }

        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.reset_statistics();

        if self.shared.running.swap(true, Ordering::AcqRel) {
            return StartStatus::AlreadyRunning;
        }
        log::info!("VAN receiver started");
        StartStatus::Started
    }

    /// Stop decoding; edges are ignored from the next one on and any frame
    /// in progress is abandoned
    pub fn stop(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            log::info!("VAN receiver stopped");
        }
    }

    /// Whether the receiver is decoding edges
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Take the oldest packet, or `None` if there is none
    pub fn dequeue(&self) -> Option<Packet> {
        self.shared.queue.dequeue()
    }

    /// Number of packets waiting
    pub fn available(&self) -> usize {
        self.shared.queue.len()
    }

    /// Maximum number of packets the queue holds
    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    /// Take every packet currently queued
    pub fn drain(&self) -> impl Iterator<Item = Packet> + '_ {
        std::iter::from_fn(move || self.dequeue())
    }

    /// Snapshot of the counters
    pub fn get_statistics(&self) -> Statistics {
        self.shared
            .counters
            .snapshot(self.shared.queue.high_water())
    }

    /// Zero the counters
    pub fn reset_statistics(&self) {
        self.shared.counters.reset();
        self.shared.queue.reset_high_water();
        log::debug!("VAN receiver statistics reset");
    }

    /// Try to correct a single flipped bit in a packet that failed its CRC
    ///
    /// On success the packet is replaced by the corrected one, marked
    /// valid, and `true` is returned.
    pub fn try_repair(&self, packet: &mut Packet) -> bool {
        if packet.valid {
            return false;
        }

        let mut raw = packet.raw_bytes();
        let Some(bit) = self.validator.repair_single_bit(&mut raw) else {
            return false;
        };

        match Packet::from_raw(&raw, true, packet.sequence, packet.timestamp_us) {
            Some(repaired) => {
                log::debug!("repaired packet #{} at bit {}", packet.sequence, bit);
                *packet = repaired;
                true
            }
            None => false,
        }
    }

    /// Configuration the receiver was built with
    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }
}

impl EdgeHandler {
    /// Process one edge of the bus line
    ///
    /// Call from the pin-change interrupt with the time of the edge and the
    /// new line level. Never blocks and never allocates.
    pub fn on_edge(&mut self, event: EdgeEvent) {
        if !self.sync_with_controller() {
            return;
        }
        if let Some(outcome) = self.decoder.on_edge(event) {
            self.deliver(outcome);
        }
    }

    /// Report that the line has been quiet for longer than the bus idle
    /// threshold
    ///
    /// Optional: the first edge of the next frame has the same effect. A
    /// timer calling this delivers frames whose last bits sit at the idle
    /// level as soon as the bus falls silent.
    pub fn on_bus_idle(&mut self) {
        if !self.sync_with_controller() {
            return;
        }
        if let Some(outcome) = self.decoder.on_bus_idle() {
            self.deliver(outcome);
        }
    }

    fn sync_with_controller(&mut self) -> bool {
        if !self.shared.running.load(Ordering::Acquire) {
            return false;
        }

        let generation = self.shared.generation.load(Ordering::Acquire);
        if generation != self.generation {
            self.generation = generation;
            self.decoder.reset();
        }
        true
    }

    fn deliver(&self, outcome: FrameOutcome) {
        let counters = &self.shared.counters;
        match outcome {
            Ok(packet) => {
                counters.record_completed(packet.valid);
                if !(packet.valid || self.surface_invalid_packets) {
                    return;
                }
                let sequence = packet.sequence;
                for _ in 0..self.shared.queue.enqueue(packet).dropped() {
                    log::trace!("packet lost on queue overflow at #{}", sequence);
                    counters.record_error(&FrameError::QueueOverflow);
                }
            }
            Err(error) => {
                log::trace!("frame rejected: {}", error);
                counters.record_error(&error);
            }
        }
    }

    /// Process a recorded sequence of edges
    pub fn replay<I>(&mut self, edges: I)
    where
        I: IntoIterator<Item = EdgeEvent>,
    {
        for edge in edges {
            self.on_edge(edge);
        }
    }

    /// Frame assembler state, for diagnostics
    pub fn state(&self) -> FrameState {
        self.decoder.state()
    }
}
