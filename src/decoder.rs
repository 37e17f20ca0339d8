//! Producer-side decoding pipeline
//!
//! edge -> [`EdgeTimer`] -> [`BitRecoverer`] -> [`Destuffer`] ->
//! [`FrameAssembler`] -> [`CrcValidator`] -> [`Packet`]
//!
//! Everything here is owned by the interrupt path. `on_edge` runs in
//! bounded time (at most one bit run per edge) and never allocates.

use crate::bit::{BitRecoverer, Recovery};
use crate::config::ReceiverConfig;
use crate::crc::CrcValidator;
use crate::edge::{EdgeEvent, EdgeInterval, EdgeTimer, Level};
use crate::error::FrameError;
use crate::frame::{FrameAssembler, FrameState};
use crate::packet::Packet;
use crate::stuffing::Destuffer;

/// Result of a frame reaching its end, or being abandoned
pub type FrameOutcome = Result<Packet, FrameError>;

/// Turns edge events into packets
#[derive(Debug)]
pub struct Decoder {
    timer: EdgeTimer,
    recoverer: BitRecoverer,
    destuffer: Destuffer,
    assembler: FrameAssembler,
    validator: CrcValidator,
    line: Level,
    max_wire_run: u8,
    frame_start_us: u32,
    sequence: u32,
}

impl Decoder {
    /// Create a decoder; the configuration is expected to be validated
    pub fn new(config: &ReceiverConfig) -> Self {
        let format = &config.format;
        Decoder {
            timer: EdgeTimer::new(config.bus_idle_threshold_us()),
            recoverer: BitRecoverer::new(
                config.nominal_bit_period_us(),
                config.timing_tolerance,
                config.max_clock_drift,
                format.stuffing.max_wire_run(),
            ),
            destuffer: Destuffer::new(format.stuffing),
            assembler: FrameAssembler::new(format.sof, format.eof, config.max_packet_size),
            validator: CrcValidator::new(format.crc),
            line: Level::IDLE,
            max_wire_run: format.stuffing.max_wire_run(),
            frame_start_us: 0,
            sequence: 0,
        }
    }

    /// Abandon any frame in progress and wait for the next idle gap
    pub fn reset(&mut self) {
        self.timer.reset();
        self.recoverer.resync();
        self.destuffer.reset();
        self.assembler.reset();
        self.line = Level::IDLE;
    }

    /// Frame assembler state
    pub fn state(&self) -> FrameState {
        self.assembler.state()
    }

    /// Current bit period estimate in 1/256 microseconds
    pub fn bit_period_q8(&self) -> u32 {
        self.recoverer.period_q8()
    }

    /// Process one edge
    ///
    /// Returns the outcome of a frame that completed or was rejected on
    /// this edge. Rejections are reported only for frames that had passed
    /// their start marker. A completed frame is returned as a packet even
    /// when its CRC does not match; check [`Packet::valid`].
    pub fn on_edge(&mut self, event: EdgeEvent) -> Option<FrameOutcome> {
        let outcome = match self.timer.on_edge(event) {
            EdgeInterval::Idle => {
                let outcome = self.on_bus_idle();
                self.frame_start_us = event.timestamp_us;
                outcome
            }
            EdgeInterval::Glitch { micros } => self
                .assembler
                .abort(FrameError::BitTimingViolation {
                    interval_us: micros,
                })
                .map(Err),
            EdgeInterval::Held { micros, level } => self.on_held(micros, level),
        };
        self.line = event.level;
        outcome
    }

    /// Close the frame in progress once the line has been quiet for longer
    /// than the idle threshold
    ///
    /// The edge after the gap does this too. Calling it from an idle timer
    /// as well delivers a frame whose wire ends at the idle level without
    /// waiting for the next frame to start.
    pub fn on_bus_idle(&mut self) -> Option<FrameOutcome> {
        // A trailing run at the idle level is closed by no edge; it is at
        // least as long as the rest of the end marker
        let tail = if self.line == Level::IDLE {
            self.flush_idle_run()
        } else {
            None
        };
        self.recoverer.resync();
        self.destuffer.reset();
        let truncated = self.assembler.bus_idle().map(Err);
        tail.or(truncated)
    }

    fn on_held(&mut self, micros: u32, level: Level) -> Option<FrameOutcome> {
        if self.assembler.state() == FrameState::Idle {
            // Nothing to decode until the next gap
            return None;
        }
        match self.recoverer.recover(micros, level) {
            Recovery::Violation { interval_us } => self
                .assembler
                .abort(FrameError::BitTimingViolation { interval_us })
                .map(Err),
            Recovery::Bits(run) => {
                for bit in run {
                    if let Some(outcome) = self.push_bit(bit) {
                        return Some(outcome);
                    }
                    if self.assembler.state() == FrameState::Idle {
                        break;
                    }
                }
                None
            }
        }
    }

    fn flush_idle_run(&mut self) -> Option<FrameOutcome> {
        for _ in 0..self.max_wire_run {
            if self.assembler.state() != FrameState::EndMarker {
                break;
            }
            match self.destuffer.push(Level::IDLE.as_bit()) {
                Ok(Some(bit)) => {
                    if let Some(result) = self.assembler.push_bit(bit) {
                        return Some(result.and_then(|raw| self.finish(&raw)));
                    }
                }
                Ok(None) => {}
                // The run stopped before the end marker did
                Err(_) => break,
            }
        }
        None
    }

    fn push_bit(&mut self, bit: bool) -> Option<FrameOutcome> {
        let bit = match self.destuffer.push(bit) {
            Ok(Some(bit)) => bit,
            Ok(None) => return None,
            Err(error) => return self.assembler.abort(error).map(Err),
        };

        match self.assembler.push_bit(bit)? {
            Ok(raw) => Some(self.finish(&raw)),
            Err(error) => Some(Err(error)),
        }
    }

    fn finish(&mut self, raw: &[u8]) -> FrameOutcome {
        let valid = match self.validator.verify(raw) {
            Ok(()) => true,
            Err(error) => {
                log::trace!("frame at {} us failed validation: {}", self.frame_start_us, error);
                false
            }
        };
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        // The assembler completes a frame exactly when it holds the header,
        // the declared data and the CRC field, which is all `from_raw`
        // checks. A refusal would mean the end marker closed a frame of the
        // wrong shape.
        Packet::from_raw(raw, valid, sequence, self.frame_start_us)
            .ok_or(FrameError::MarkerMismatch)
    }
}
