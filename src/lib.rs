//! # VAN Bus Receiver
//!
//! An interrupt-driven receiver for the VAN (Vehicle Area Network) automotive
//! serial bus. The bus line is sampled only through edge events: every level
//! transition is handed to the receiver together with a microsecond
//! timestamp, and complete, CRC-checked packets come out the other end.
//!
//! The receive pipeline:
//!
//! - Edge timing: interval since the previous edge, idle gap detection
//! - Bit recovery: interval to bit count, with clock drift tracking
//! - De-stuffing: removal and checking of the bits that force transitions
//! - Frame assembly: start/end markers, header, length, data and CRC field
//! - CRC validation: CRC-15 over the frame contents
//! - Packet queue: bounded, lock-free hand-off to the consumer
//!
//! ## Features
//!
//! - `serde`: Enable serialization/deserialization of packets, edge events
//!   and statistics
//!
//! ## Example
//!
//! ```
//! use van_bus_rx::encoding::{EdgeSynthesizer, FrameEncoder};
//! use van_bus_rx::{Receiver, ReceiverConfig};
//!
//! let (receiver, mut handler) = Receiver::new(ReceiverConfig::default())?;
//! receiver.start();
//!
//! // In a real system `handler.on_edge` is called from the pin interrupt
//! let config = receiver.config();
//! let wire = FrameEncoder::new(&config.format).encode(0x1A2, 0, &[0x01, 0x02]);
//! let edges = EdgeSynthesizer::new(config.nominal_bit_period_us()).frame_edges(0, &wire);
//! handler.replay(edges);
//!
//! let packet = receiver.dequeue().ok_or("no packet")?;
//! assert_eq!(packet.identifier, 0x1A2);
//! assert_eq!(packet.data.as_slice(), &[0x01, 0x02]);
//! assert!(packet.valid);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bit;
pub mod config;
pub mod crc;
pub mod decoder;
pub mod edge;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod packet;
pub mod queue;
pub mod receiver;
pub mod stats;
pub mod stuffing;

pub use config::{FrameFormat, Marker, OverflowPolicy, ReceiverConfig, StuffingRule};
pub use edge::{EdgeEvent, Level};
pub use error::{ConfigError, FrameError, Result};
pub use frame::FrameState;
pub use packet::{FrameHeader, Packet};
pub use receiver::{EdgeHandler, Receiver, StartStatus};
pub use stats::Statistics;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// VAN bus constants
pub mod van {
    use crate::config::Marker;

    /// Nominal bit rate in bits per second
    pub const BIT_RATE: u32 = 125_000;

    /// Nominal duration of one wire bit in microseconds
    pub const NOMINAL_BIT_PERIOD_US: u32 = 1_000_000 / BIT_RATE;

    /// Bit periods without an edge after which the bus counts as idle
    pub const IDLE_BIT_PERIODS: u32 = 10;

    /// Start-of-frame marker, first bit dominant
    pub const SOF_MARKER: Marker = Marker::new(0x0E, 8);

    /// End-of-frame marker
    pub const EOF_MARKER: Marker = Marker::new(0xFF, 8);

    /// Width of the frame CRC in bits
    pub const CRC_BITS: u8 = 15;

    /// Header word plus length byte
    pub const HEADER_BYTES: usize = 3;

    /// Position of the length byte in the raw frame
    pub const LENGTH_OFFSET: usize = 2;

    /// CRC field size; the CRC sits in its upper 15 bits
    pub const CRC_FIELD_BYTES: usize = 2;

    /// Smallest frame: header, length and CRC field with no data
    pub const MIN_FRAME_BYTES: usize = HEADER_BYTES + CRC_FIELD_BYTES;

    /// Maximum number of data bytes in one frame
    pub const MAX_DATA_BYTES: usize = 28;

    /// Largest raw frame, markers excluded
    pub const RAW_FRAME_CAPACITY: usize = MIN_FRAME_BYTES + MAX_DATA_BYTES;

    /// Largest 12-bit identifier
    pub const MAX_IDENTIFIER: u16 = 0x0FFF;

    /// Command flag bits of the header word
    pub const FLAGS_MASK: u8 = 0x0F;

    /// Largest configurable packet queue; a power of two
    pub const MAX_QUEUE_CAPACITY: usize = 64;
}
