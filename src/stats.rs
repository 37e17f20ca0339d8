//! Receiver statistics
//!
//! Counters are written by the interrupt path and read by the consumer.
//! They are diagnostic only, so relaxed atomics are enough: a snapshot may
//! lag the producer by the frame currently being processed.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::FrameError;

/// Snapshot of the receiver counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Statistics {
    /// Frames that reached their end marker, whatever their CRC
    pub frames_completed: u32,
    /// Completed frames whose CRC matched
    pub packets_valid: u32,
    /// Frames abandoned on an out-of-tolerance edge interval or missed edge
    pub bit_timing_violations: u32,
    /// Frames abandoned on a stuffing bit of the wrong polarity
    pub stuffing_violations: u32,
    /// Frames abandoned for exceeding the maximum packet size
    pub frames_too_long: u32,
    /// Frames abandoned on a malformed end marker
    pub marker_mismatches: u32,
    /// Completed frames whose CRC did not match
    pub crc_mismatches: u32,
    /// Frames cut short by the bus going idle
    pub truncated_frames: u32,
    /// Packets lost because the queue was full
    pub queue_overflows: u32,
    /// Largest number of packets queued at once
    pub queue_high_water: u32,
}

impl Statistics {
    /// Frames that did not make it to the consumer as valid packets,
    /// queue overflows excluded
    pub fn frames_rejected(&self) -> u32 {
        self.bit_timing_violations
            + self.stuffing_violations
            + self.frames_too_long
            + self.marker_mismatches
            + self.crc_mismatches
            + self.truncated_frames
    }

    /// Fraction of started frames that were rejected (0.0 to 1.0)
    pub fn error_rate(&self) -> f32 {
        let rejected = self.frames_rejected();
        let total = self.packets_valid + rejected;
        if total > 0 {
            rejected as f32 / total as f32
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for Statistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "completed={} valid={} timing={} stuffing={} too_long={} marker={} crc={} truncated={} overflow={} max_queued={}",
            self.frames_completed,
            self.packets_valid,
            self.bit_timing_violations,
            self.stuffing_violations,
            self.frames_too_long,
            self.marker_mismatches,
            self.crc_mismatches,
            self.truncated_frames,
            self.queue_overflows,
            self.queue_high_water
        )
    }
}

/// Live counters shared between producer and consumer
#[derive(Debug, Default)]
pub struct Counters {
    frames_completed: AtomicU32,
    packets_valid: AtomicU32,
    bit_timing_violations: AtomicU32,
    stuffing_violations: AtomicU32,
    frames_too_long: AtomicU32,
    marker_mismatches: AtomicU32,
    crc_mismatches: AtomicU32,
    truncated_frames: AtomicU32,
    queue_overflows: AtomicU32,
}

impl Counters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a completed frame
    pub fn record_completed(&self, valid: bool) {
        self.frames_completed.fetch_add(1, Ordering::Relaxed);
        if valid {
            self.packets_valid.fetch_add(1, Ordering::Relaxed);
        } else {
            self.crc_mismatches.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count a rejected frame, or a packet lost to a full queue, under its
    /// failure kind
    pub fn record_error(&self, error: &FrameError) {
        let counter = match error {
            FrameError::BitTimingViolation { .. } => &self.bit_timing_violations,
            FrameError::StuffingViolation => &self.stuffing_violations,
            FrameError::FrameTooLong { .. } => &self.frames_too_long,
            FrameError::MarkerMismatch => &self.marker_mismatches,
            FrameError::CrcMismatch { .. } => &self.crc_mismatches,
            FrameError::QueueOverflow => &self.queue_overflows,
            FrameError::BusIdle => &self.truncated_frames,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot; the queue high-water mark is supplied by the caller
    pub fn snapshot(&self, queue_high_water: usize) -> Statistics {
        Statistics {
            frames_completed: self.frames_completed.load(Ordering::Relaxed),
            packets_valid: self.packets_valid.load(Ordering::Relaxed),
            bit_timing_violations: self.bit_timing_violations.load(Ordering::Relaxed),
            stuffing_violations: self.stuffing_violations.load(Ordering::Relaxed),
            frames_too_long: self.frames_too_long.load(Ordering::Relaxed),
            marker_mismatches: self.marker_mismatches.load(Ordering::Relaxed),
            crc_mismatches: self.crc_mismatches.load(Ordering::Relaxed),
            truncated_frames: self.truncated_frames.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            queue_high_water: u32::try_from(queue_high_water).unwrap_or(u32::MAX),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in [
            &self.frames_completed,
            &self.packets_valid,
            &self.bit_timing_violations,
            &self.stuffing_violations,
            &self.frames_too_long,
            &self.marker_mismatches,
            &self.crc_mismatches,
            &self.truncated_frames,
            &self.queue_overflows,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
