//! Packets handed from the receiver to application code

use bitfield::bitfield;
use heapless::Vec;

use crate::van;

bitfield! {
    /// First two bytes of a frame: 12-bit identifier and the 4 command flags
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct FrameHeader(u16);
    impl Debug;
    pub u16, identifier, set_identifier: 15, 4;
    pub u8, flags, set_flags: 3, 0;
    pub ext, set_ext: 3;
    pub rak, set_rak: 2;
    pub read, set_read: 1;
    pub rtr, set_rtr: 0;
}

impl FrameHeader {
    /// Build a header from identifier and flags, truncating both to width
    pub fn from_fields(identifier: u16, flags: u8) -> Self {
        let mut header = FrameHeader(0);
        header.set_identifier(identifier & van::MAX_IDENTIFIER);
        header.set_flags(flags & van::FLAGS_MASK);
        header
    }

    /// Decode from the two header bytes
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        FrameHeader(u16::from_be_bytes(bytes))
    }

    /// Encode as the two header bytes
    pub fn to_bytes(&self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

/// A received frame
///
/// Only complete frames become packets; a packet is never partially
/// filled. `valid` is false only when the receiver is configured to
/// surface CRC failures.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Packet {
    /// 12-bit identifier
    pub identifier: u16,
    /// 4-bit command flags (EXT, RAK, R/W, RTR)
    pub flags: u8,
    /// Data bytes
    pub data: Vec<u8, { van::MAX_DATA_BYTES }>,
    /// CRC field as received (15-bit CRC shifted left by one)
    pub crc: u16,
    /// Whether the received CRC matched
    pub valid: bool,
    /// Per-receiver sequence number, incremented for every completed frame
    pub sequence: u32,
    /// Timestamp of the frame's first edge in microseconds
    pub timestamp_us: u32,
}

impl Packet {
    /// Build a packet from a raw frame (header, length, data, CRC field)
    ///
    /// Returns `None` if the raw frame is inconsistent with its length byte.
    pub fn from_raw(raw: &[u8], valid: bool, sequence: u32, timestamp_us: u32) -> Option<Self> {
        if raw.len() < van::MIN_FRAME_BYTES {
            return None;
        }
        let len = usize::from(raw[van::LENGTH_OFFSET]);
        if raw.len() != van::MIN_FRAME_BYTES + len {
            return None;
        }

        let header = FrameHeader::from_bytes([raw[0], raw[1]]);
        let data_end = van::HEADER_BYTES + len;
        let data = Vec::from_slice(&raw[van::HEADER_BYTES..data_end]).ok()?;
        let crc = u16::from_be_bytes([raw[data_end], raw[data_end + 1]]);

        Some(Packet {
            identifier: header.identifier(),
            flags: header.flags(),
            data,
            crc,
            valid,
            sequence,
            timestamp_us,
        })
    }

    /// Header word view of identifier and flags
    pub fn header(&self) -> FrameHeader {
        FrameHeader::from_fields(self.identifier, self.flags)
    }

    /// Extended-frame flag
    pub fn ext(&self) -> bool {
        self.header().ext()
    }

    /// Request-acknowledge flag
    pub fn rak(&self) -> bool {
        self.header().rak()
    }

    /// Read (as opposed to write) flag
    pub fn is_read(&self) -> bool {
        self.header().read()
    }

    /// Remote-transmission-request flag
    pub fn rtr(&self) -> bool {
        self.header().rtr()
    }

    /// Number of data bytes
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    /// Frame bytes as they were stored by the receiver
    pub fn raw_bytes(&self) -> Vec<u8, { van::RAW_FRAME_CAPACITY }> {
        let mut raw = Vec::new();
        // Cannot overflow: header, length, 28 data bytes and CRC fill the capacity exactly
        let _ = raw.extend_from_slice(&self.header().to_bytes());
        let _ = raw.push(self.data.len() as u8);
        let _ = raw.extend_from_slice(&self.data);
        let _ = raw.extend_from_slice(&self.crc.to_be_bytes());
        raw
    }
}

impl std::fmt::Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} id=0x{:03X} flags=0x{:X} len={} data=",
            self.sequence,
            self.identifier,
            self.flags,
            self.data.len()
        )?;
        for (i, byte) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, "-")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        write!(
            f,
            " crc=0x{:04X} {}",
            self.crc,
            if self.valid { "ok" } else { "CRC_ERROR" }
        )
    }
}
