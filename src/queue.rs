//! Bounded packet queue between the interrupt path and the consumer
//!
//! Storage is a `heapless` lock-free queue sized once for the largest
//! configurable capacity; the configured capacity is enforced on top of it
//! with an occupancy counter. The edge handler is the only producer, so the
//! occupancy it reads can only be stale in the consumer's favour. Neither
//! side ever blocks or allocates.

use std::sync::atomic::{AtomicUsize, Ordering};

use heapless::mpmc::MpMcQueue;

use crate::config::OverflowPolicy;
use crate::packet::Packet;
use crate::van;

/// What happened to a packet handed to [`PacketQueue::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Stored without loss
    Stored,
    /// Stored after the oldest queued packet was discarded
    ReplacedOldest,
    /// Queue full; the incoming packet was discarded
    DroppedNewest,
}

impl Enqueued {
    /// Number of packets lost by this call
    pub fn dropped(&self) -> u32 {
        match self {
            Enqueued::Stored => 0,
            Enqueued::ReplacedOldest | Enqueued::DroppedNewest => 1,
        }
    }
}

/// Fixed-capacity FIFO of packets
pub struct PacketQueue {
    packets: MpMcQueue<Packet, { van::MAX_QUEUE_CAPACITY }>,
    // Reserved before a packet goes in, released after one comes out, so it
    // never reads below the number of stored packets
    occupied: AtomicUsize,
    capacity: usize,
    policy: OverflowPolicy,
    high_water: AtomicUsize,
}

impl PacketQueue {
    /// Create a queue holding at most `capacity` packets, clamped to
    /// `1..=van::MAX_QUEUE_CAPACITY`
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        PacketQueue {
            packets: MpMcQueue::new(),
            occupied: AtomicUsize::new(0),
            capacity: capacity.clamp(1, van::MAX_QUEUE_CAPACITY),
            policy,
            high_water: AtomicUsize::new(0),
        }
    }

    /// Maximum number of packets held
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overflow policy in force
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Packets currently queued
    pub fn len(&self) -> usize {
        self.occupied.load(Ordering::Acquire).min(self.capacity)
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest number of packets held at once since the last reset
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }

    /// Forget the high-water mark
    pub fn reset_high_water(&self) {
        self.high_water.store(self.len(), Ordering::Relaxed);
    }

    /// Add a packet without blocking, applying the overflow policy when full
    ///
    /// Must only be called from one producer at a time.
    pub fn enqueue(&self, packet: Packet) -> Enqueued {
        let packet = match self.try_push(packet) {
            Ok(()) => return Enqueued::Stored,
            Err(packet) => packet,
        };

        match self.policy {
            OverflowPolicy::DropNewest => Enqueued::DroppedNewest,
            OverflowPolicy::DropOldest => {
                let displaced = self.dequeue().is_some();
                match (self.try_push(packet), displaced) {
                    (Ok(()), true) => Enqueued::ReplacedOldest,
                    // The consumer emptied the queue in between
                    (Ok(()), false) => Enqueued::Stored,
                    // Capacity 1 with the consumer between its two steps;
                    // nothing was displaced then
                    (Err(_), _) => Enqueued::DroppedNewest,
                }
            }
        }
    }

    /// Remove the oldest packet, or `None` if the queue is empty
    pub fn dequeue(&self) -> Option<Packet> {
        let packet = self.packets.dequeue()?;
        self.occupied.fetch_sub(1, Ordering::AcqRel);
        Some(packet)
    }

    fn try_push(&self, packet: Packet) -> Result<(), Packet> {
        let reserved = self.occupied.fetch_add(1, Ordering::AcqRel);
        if reserved >= self.capacity {
            self.occupied.fetch_sub(1, Ordering::AcqRel);
            return Err(packet);
        }
        if let Err(packet) = self.packets.enqueue(packet) {
            self.occupied.fetch_sub(1, Ordering::AcqRel);
            return Err(packet);
        }
        self.high_water.fetch_max(reserved + 1, Ordering::Relaxed);
        Ok(())
    }
}

impl std::fmt::Debug for PacketQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("policy", &self.policy)
            .finish()
    }
}
