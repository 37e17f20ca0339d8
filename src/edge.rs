//! Edge events and the edge timer
//!
//! The pin/interrupt binding reports every transition of the bus line as an
//! [`EdgeEvent`]. The [`EdgeTimer`] turns consecutive events into the
//! interval the line held its previous level, which is all the bit
//! recoverer needs.

/// Logical level of the bus line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Level {
    /// Dominant level, read as bit 0
    Low,
    /// Recessive level, read as bit 1; the bus rests here when idle
    High,
}

impl Level {
    /// Level the bus rests at between frames
    pub const IDLE: Level = Level::High;

    /// Bit value carried by this level
    pub fn as_bit(&self) -> bool {
        match self {
            Level::Low => false,
            Level::High => true,
        }
    }

    /// Level that carries the given bit value
    pub fn from_bit(bit: bool) -> Self {
        if bit {
            Level::High
        } else {
            Level::Low
        }
    }

    /// The opposite level
    pub fn toggled(&self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Low => write!(f, "low"),
            Level::High => write!(f, "high"),
        }
    }
}

/// One observed transition of the bus line
///
/// `timestamp_us` is a free-running microsecond counter; it may wrap
/// around, intervals are computed with wrapping arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeEvent {
    /// Time of the transition in microseconds
    pub timestamp_us: u32,
    /// Line level right after the transition
    pub level: Level,
}

impl EdgeEvent {
    /// Create a new edge event
    pub fn new(timestamp_us: u32, level: Level) -> Self {
        EdgeEvent {
            timestamp_us,
            level,
        }
    }
}

/// What the edge timer learned from one edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeInterval {
    /// The line was quiet for longer than the idle threshold (or this is
    /// the first edge seen); a frame may start with this edge
    Idle,
    /// The line held `level` for `micros` before this edge
    Held { micros: u32, level: Level },
    /// The edge reports the level the line was already at, so a
    /// transition was missed in between
    Glitch { micros: u32 },
}

/// Measures the time between consecutive edges
///
/// Runs in interrupt context: constant time, no loops, no allocation.
#[derive(Debug, Clone)]
pub struct EdgeTimer {
    idle_threshold_us: u32,
    last: Option<EdgeEvent>,
}

impl EdgeTimer {
    /// Create a timer that reports gaps longer than `idle_threshold_us` as idle
    pub fn new(idle_threshold_us: u32) -> Self {
        EdgeTimer {
            idle_threshold_us,
            last: None,
        }
    }

    /// Forget the previous edge; the next one is reported as [`EdgeInterval::Idle`]
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Idle threshold in microseconds
    pub fn idle_threshold_us(&self) -> u32 {
        self.idle_threshold_us
    }

    /// Record an edge and classify the interval since the previous one
    pub fn on_edge(&mut self, event: EdgeEvent) -> EdgeInterval {
        let previous = self.last.replace(event);
        let Some(previous) = previous else {
            return EdgeInterval::Idle;
        };

        let micros = event.timestamp_us.wrapping_sub(previous.timestamp_us);
        if micros > self.idle_threshold_us {
            EdgeInterval::Idle
        } else if event.level == previous.level {
            EdgeInterval::Glitch { micros }
        } else {
            EdgeInterval::Held {
                micros,
                level: previous.level,
            }
        }
    }
}
