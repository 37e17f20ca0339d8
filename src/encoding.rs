//! Synthetic edge streams
//!
//! Builds the edge sequence a transmitter would put on the line for a given
//! frame, so the receive pipeline can be exercised without hardware and
//! checked against captured bus traces. Nothing here drives a pin.

use crate::config::FrameFormat;
use crate::crc::CrcValidator;
use crate::edge::{EdgeEvent, Level};
use crate::packet::FrameHeader;
use crate::stuffing::Stuffer;

/// Encodes frame fields into stuffed wire bits
#[derive(Debug)]
pub struct FrameEncoder {
    format: FrameFormat,
    validator: CrcValidator,
}

impl FrameEncoder {
    /// Create an encoder for the given wire layout
    pub fn new(format: &FrameFormat) -> Self {
        FrameEncoder {
            format: *format,
            validator: CrcValidator::new(format.crc),
        }
    }

    /// Raw frame bytes: header word, length, data and CRC field
    pub fn raw_frame(&self, identifier: u16, flags: u8, data: &[u8]) -> Vec<u8> {
        let mut raw = Vec::with_capacity(data.len() + 5);
        raw.extend_from_slice(&FrameHeader::from_fields(identifier, flags).to_bytes());
        raw.push(data.len() as u8);
        raw.extend_from_slice(data);
        let crc = self.validator.field(&raw);
        raw.extend_from_slice(&crc.to_be_bytes());
        raw
    }

    /// Wire bits of a well-formed frame
    pub fn encode(&self, identifier: u16, flags: u8, data: &[u8]) -> Vec<bool> {
        self.encode_raw(&self.raw_frame(identifier, flags, data))
    }

    /// Wire bits for arbitrary raw frame bytes, wrapped in the markers
    ///
    /// The wire may end at the idle level; the receiver closes that last
    /// run when the bus goes idle.
    pub fn encode_raw(&self, raw: &[u8]) -> Vec<bool> {
        let mut payload: Vec<bool> = self.format.sof.bits().collect();
        for &byte in raw {
            payload.extend((0..8).rev().map(|i| (byte >> i) & 1 != 0));
        }
        payload.extend(self.format.eof.bits());

        Stuffer::stuff(self.format.stuffing, &payload)
    }
}

/// Turns wire bits into timed edge events
#[derive(Debug, Clone, Copy)]
pub struct EdgeSynthesizer {
    bit_period_us: u32,
}

impl EdgeSynthesizer {
    /// Create a synthesizer with the given bit period
    pub fn new(bit_period_us: u32) -> Self {
        EdgeSynthesizer { bit_period_us }
    }

    /// Edges for `wire`, starting at `start_us` from an idle line and
    /// returning the line to idle afterwards
    pub fn frame_edges(&self, start_us: u32, wire: &[bool]) -> Vec<EdgeEvent> {
        let mut edges = Vec::new();
        let mut level = Level::IDLE;
        let mut time = start_us;

        for &bit in wire {
            let next = Level::from_bit(bit);
            if next != level {
                edges.push(EdgeEvent::new(time, next));
                level = next;
            }
            time = time.wrapping_add(self.bit_period_us);
        }
        if level != Level::IDLE {
            edges.push(EdgeEvent::new(time, Level::IDLE));
        }
        edges
    }

    /// Time the line is busy for `wire`, in microseconds
    pub fn duration_us(&self, wire: &[bool]) -> u32 {
        self.bit_period_us * wire.len() as u32
    }
}
