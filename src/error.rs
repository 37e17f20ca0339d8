//! Error types for the VAN bus receiver

use thiserror::Error;

/// Result type for receiver construction and configuration
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors reported while validating a receiver configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Nominal bit period is zero or not representable in microseconds
    #[error("Invalid bit period: {0}")]
    InvalidBitPeriod(String),

    /// Timing tolerance or clock drift outside the accepted range
    #[error("Invalid timing tolerance: {0}")]
    InvalidTolerance(String),

    /// Bus idle threshold too short to tell a gap from the longest bit run
    #[error("Invalid idle threshold: {0}")]
    InvalidIdleThreshold(String),

    /// Queue capacity is zero
    #[error("Invalid queue capacity: {0}")]
    InvalidQueueCapacity(String),

    /// Maximum packet size outside the raw frame buffer bounds
    #[error("Invalid packet size: {0}")]
    InvalidPacketSize(String),

    /// Start or end marker cannot be matched on the wire
    #[error("Invalid marker: {0}")]
    InvalidMarker(String),

    /// Stuffing rule run length out of range
    #[error("Invalid stuffing rule: {0}")]
    InvalidStuffing(String),
}

impl ConfigError {
    /// Create a new InvalidBitPeriod error
    pub fn invalid_bit_period(msg: impl Into<String>) -> Self {
        ConfigError::InvalidBitPeriod(msg.into())
    }

    /// Create a new InvalidTolerance error
    pub fn invalid_tolerance(msg: impl Into<String>) -> Self {
        ConfigError::InvalidTolerance(msg.into())
    }

    /// Create a new InvalidIdleThreshold error
    pub fn invalid_idle_threshold(msg: impl Into<String>) -> Self {
        ConfigError::InvalidIdleThreshold(msg.into())
    }

    /// Create a new InvalidQueueCapacity error
    pub fn invalid_queue_capacity(msg: impl Into<String>) -> Self {
        ConfigError::InvalidQueueCapacity(msg.into())
    }

    /// Create a new InvalidPacketSize error
    pub fn invalid_packet_size(msg: impl Into<String>) -> Self {
        ConfigError::InvalidPacketSize(msg.into())
    }

    /// Create a new InvalidMarker error
    pub fn invalid_marker(msg: impl Into<String>) -> Self {
        ConfigError::InvalidMarker(msg.into())
    }

    /// Create a new InvalidStuffing error
    pub fn invalid_stuffing(msg: impl Into<String>) -> Self {
        ConfigError::InvalidStuffing(msg.into())
    }
}

/// Reasons a frame is rejected on the producer side
///
/// These never escape the interrupt path as failures; each one is counted
/// in [`Statistics`](crate::stats::Statistics) and the receiver carries on.
/// The type is `Copy` and carries no owned data so it can be produced
/// without allocating.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Edge interval matches no multiple of the bit period
    #[error("Bit timing violation: edge interval of {interval_us} us")]
    BitTimingViolation { interval_us: u32 },

    /// A stuffing bit had the wrong polarity
    #[error("Stuffing violation")]
    StuffingViolation,

    /// Frame grew, or declared a length, beyond the raw frame buffer bound
    #[error("Frame too long: {size} bytes exceeds maximum of {max}")]
    FrameTooLong { size: usize, max: usize },

    /// End marker not found where expected
    #[error("End-of-frame marker mismatch")]
    MarkerMismatch,

    /// Transmitted CRC does not match the computed one
    #[error("CRC mismatch: computed {computed:#06X}, received {received:#06X}")]
    CrcMismatch { computed: u16, received: u16 },

    /// Consumer is not draining the packet queue fast enough
    #[error("Packet queue overflow")]
    QueueOverflow,

    /// Bus went idle before the end marker
    #[error("Bus idle before end of frame")]
    BusIdle,
}
