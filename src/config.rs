//! Receiver configuration
//!
//! Everything that is a protocol constant on a real bus (markers, stuffing
//! rule, CRC parameters) is carried here rather than hard-coded, so the
//! receiver can be checked against captured traces from different
//! vehicles.

use std::time::Duration;

use crate::crc::VAN_CRC15;
use crate::error::{ConfigError, Result};
use crate::van;

/// Rule the transmitter follows when inserting stuffing bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StuffingRule {
    /// A complementary bit follows every run of `k` identical payload bits.
    /// The stuffing bit does not count towards the next run.
    RunLength(u8),
    /// The complement of the last bit follows every block of `n` payload
    /// bits, whatever their values (VAN Enhanced Manchester uses `n = 4`)
    Block(u8),
}

impl StuffingRule {
    /// Largest accepted `k` or `n`
    pub const MAX_RUN: u8 = 8;

    /// Longest run of identical levels a legal frame can put on the wire
    pub fn max_wire_run(&self) -> u8 {
        match *self {
            StuffingRule::RunLength(k) => k + 1,
            StuffingRule::Block(n) => n + 1,
        }
    }

    /// Number of payload bits between two stuffing bits (`k` or `n`)
    pub fn period(&self) -> u8 {
        match *self {
            StuffingRule::RunLength(k) => k,
            StuffingRule::Block(n) => n,
        }
    }

    fn validate(&self) -> Result<()> {
        let period = self.period();
        if period == 0 || period > Self::MAX_RUN {
            return Err(ConfigError::invalid_stuffing(format!(
                "{:?}: run length must be in [1, {}]",
                self,
                Self::MAX_RUN
            )));
        }
        Ok(())
    }
}

impl Default for StuffingRule {
    fn default() -> Self {
        StuffingRule::RunLength(1)
    }
}

/// A fixed bit pattern, transmitted MSB first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Marker {
    /// Pattern bits, right-aligned
    pub pattern: u32,
    /// Number of bits in the pattern (1-32)
    pub len: u8,
}

impl Marker {
    /// Create a new marker
    pub const fn new(pattern: u32, len: u8) -> Self {
        Marker { pattern, len }
    }

    /// Bit `index` of the pattern, counting from the first transmitted bit
    pub fn bit(&self, index: u8) -> bool {
        (self.pattern >> (self.len - 1 - index)) & 1 != 0
    }

    /// Whether the first `seen` received bits, right-aligned in `received`,
    /// agree with the start of the pattern
    pub fn prefix_matches(&self, received: u32, seen: u8) -> bool {
        if seen == 0 {
            return true;
        }
        if seen > self.len {
            return false;
        }
        let shift = u32::from(self.len - seen);
        let mask = if seen == 32 { u32::MAX } else { (1u32 << seen) - 1 };
        (self.pattern >> shift) & mask == received & mask
    }

    /// Iterate over the pattern bits in transmission order
    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| self.bit(i))
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.len == 0 || self.len > 32 {
            return Err(ConfigError::invalid_marker(format!(
                "{} length {} out of range [1, 32]",
                name, self.len
            )));
        }
        if self.len < 32 && self.pattern >> self.len != 0 {
            return Err(ConfigError::invalid_marker(format!(
                "{} pattern {:#X} does not fit in {} bits",
                name, self.pattern, self.len
            )));
        }
        Ok(())
    }
}

/// Policy applied when a packet arrives and the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OverflowPolicy {
    /// Discard the incoming packet
    #[default]
    DropNewest,
    /// Discard the oldest queued packet to make room
    DropOldest,
}

/// Wire layout constants of a frame
#[derive(Debug, Clone, Copy)]
pub struct FrameFormat {
    /// Start-of-frame marker
    pub sof: Marker,
    /// End-of-frame marker
    pub eof: Marker,
    /// Stuffing rule applied to every field, markers included
    pub stuffing: StuffingRule,
    /// CRC-15 parameters
    pub crc: &'static crc::Algorithm<u16>,
}

impl Default for FrameFormat {
    fn default() -> Self {
        FrameFormat {
            sof: van::SOF_MARKER,
            eof: van::EOF_MARKER,
            stuffing: StuffingRule::default(),
            crc: &VAN_CRC15,
        }
    }
}

impl FrameFormat {
    fn validate(&self) -> Result<()> {
        self.sof.validate("start-of-frame")?;
        self.eof.validate("end-of-frame")?;
        self.stuffing.validate()?;

        // The first wire bit of a frame must differ from the idle level,
        // otherwise the frame start merges into the idle gap
        if self.sof.bit(0) == crate::edge::Level::IDLE.as_bit() {
            return Err(ConfigError::invalid_marker(
                "start-of-frame marker must begin with a dominant (0) bit".to_string(),
            ));
        }

        if self.crc.width != van::CRC_BITS {
            return Err(ConfigError::invalid_marker(format!(
                "CRC width {} does not match the {}-bit CRC field",
                self.crc.width,
                van::CRC_BITS
            )));
        }
        Ok(())
    }
}

/// Configuration for a [`Receiver`](crate::receiver::Receiver)
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Duration of one bit on the wire
    pub nominal_bit_period: Duration,
    /// Accepted deviation from each multiple of the bit period, as a
    /// fraction of the nominal period
    pub timing_tolerance: f32,
    /// How far the adaptive bit period may drift from nominal, as a fraction
    pub max_clock_drift: f32,
    /// Quiet time after which the bus is considered idle
    ///
    /// Frames are only recognised after a gap longer than this. A shorter
    /// quiet spell between frames is taken as a long bit run, and the next
    /// start marker is then lost without being counted.
    pub bus_idle_threshold: Duration,
    /// Number of packets the queue holds, at most
    /// [`van::MAX_QUEUE_CAPACITY`]
    pub queue_capacity: usize,
    /// What to drop when the queue is full
    pub overflow_policy: OverflowPolicy,
    /// Enqueue packets that failed the CRC check, flagged invalid
    pub surface_invalid_packets: bool,
    /// Upper bound on the raw frame size in bytes (header, length, data, CRC)
    pub max_packet_size: usize,
    /// Wire layout
    pub format: FrameFormat,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            nominal_bit_period: Duration::from_micros(u64::from(van::NOMINAL_BIT_PERIOD_US)),
            timing_tolerance: 0.25,
            max_clock_drift: 0.05,
            bus_idle_threshold: Duration::from_micros(u64::from(
                van::NOMINAL_BIT_PERIOD_US * van::IDLE_BIT_PERIODS,
            )),
            queue_capacity: 15,
            overflow_policy: OverflowPolicy::default(),
            surface_invalid_packets: false,
            max_packet_size: van::RAW_FRAME_CAPACITY,
            format: FrameFormat::default(),
        }
    }
}

impl ReceiverConfig {
    /// Largest nominal bit period accepted, in microseconds
    pub const MAX_BIT_PERIOD_US: u32 = 10_000;

    /// Create a new configuration with VAN defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the nominal bit period
    pub fn with_nominal_bit_period(mut self, period: Duration) -> Self {
        self.nominal_bit_period = period;
        self
    }

    /// Builder method: set the timing tolerance fraction
    pub fn with_timing_tolerance(mut self, tolerance: f32) -> Self {
        self.timing_tolerance = tolerance;
        self
    }

    /// Builder method: set the maximum clock drift fraction
    pub fn with_max_clock_drift(mut self, drift: f32) -> Self {
        self.max_clock_drift = drift;
        self
    }

    /// Builder method: set the bus idle threshold
    pub fn with_bus_idle_threshold(mut self, threshold: Duration) -> Self {
        self.bus_idle_threshold = threshold;
        self
    }

    /// Builder method: set the queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Builder method: set the queue overflow policy
    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Builder method: surface CRC-failed packets
    pub fn with_surface_invalid_packets(mut self, enabled: bool) -> Self {
        self.surface_invalid_packets = enabled;
        self
    }

    /// Builder method: set the maximum raw frame size
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Builder method: set the wire layout
    pub fn with_format(mut self, format: FrameFormat) -> Self {
        self.format = format;
        self
    }

    /// Builder method: set the stuffing rule
    pub fn with_stuffing(mut self, stuffing: StuffingRule) -> Self {
        self.format.stuffing = stuffing;
        self
    }

    /// Nominal bit period in whole microseconds
    pub fn nominal_bit_period_us(&self) -> u32 {
        u32::try_from(self.nominal_bit_period.as_micros()).unwrap_or(u32::MAX)
    }

    /// Bus idle threshold in whole microseconds
    pub fn bus_idle_threshold_us(&self) -> u32 {
        u32::try_from(self.bus_idle_threshold.as_micros()).unwrap_or(u32::MAX)
    }

    /// Check that the configuration describes a receivable bus
    pub fn validate(&self) -> Result<()> {
        let period_us = self.nominal_bit_period_us();
        if period_us == 0 || period_us > Self::MAX_BIT_PERIOD_US {
            return Err(ConfigError::invalid_bit_period(format!(
                "{:?} out of range [1 us, {} us]",
                self.nominal_bit_period,
                Self::MAX_BIT_PERIOD_US
            )));
        }

        if !(self.timing_tolerance > 0.0 && self.timing_tolerance < 0.5) {
            return Err(ConfigError::invalid_tolerance(format!(
                "tolerance {} must be in (0, 0.5)",
                self.timing_tolerance
            )));
        }

        if !(self.max_clock_drift >= 0.0 && self.max_clock_drift < self.timing_tolerance) {
            return Err(ConfigError::invalid_tolerance(format!(
                "clock drift {} must be in [0, {})",
                self.max_clock_drift, self.timing_tolerance
            )));
        }

        self.format.validate()?;

        let longest_run = f64::from(self.format.stuffing.max_wire_run())
            * f64::from(period_us)
            * (1.0 + f64::from(self.timing_tolerance));
        if f64::from(self.bus_idle_threshold_us()) <= longest_run {
            return Err(ConfigError::invalid_idle_threshold(format!(
                "{:?} does not exceed the longest legal bit run ({:.1} us)",
                self.bus_idle_threshold, longest_run
            )));
        }

        if self.queue_capacity == 0 || self.queue_capacity > van::MAX_QUEUE_CAPACITY {
            return Err(ConfigError::invalid_queue_capacity(format!(
                "{} out of range [1, {}]",
                self.queue_capacity,
                van::MAX_QUEUE_CAPACITY
            )));
        }

        if self.max_packet_size < van::MIN_FRAME_BYTES
            || self.max_packet_size > van::RAW_FRAME_CAPACITY
        {
            return Err(ConfigError::invalid_packet_size(format!(
                "{} out of range [{}, {}]",
                self.max_packet_size,
                van::MIN_FRAME_BYTES,
                van::RAW_FRAME_CAPACITY
            )));
        }

        Ok(())
    }
}
