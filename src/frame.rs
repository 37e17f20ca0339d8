//! Frame assembly
//!
//! De-stuffed bits are collected MSB first into bytes and routed through an
//! explicit state machine:
//!
//! ```text
//! Idle --bus idle--> Syncing --SOF--> Header --len--> Data --> Crc --> EndMarker
//!   ^                   |                                                  |
//!   +---- SOF mismatch -+---------- complete / abort ----------------------+
//! ```
//!
//! Completion and abort are reported as the outcome of the bit that caused
//! them; the assembler is back in [`FrameState::Idle`] when the outcome is
//! returned. Nothing is surfaced for a frame that did not reach its end
//! marker.

use heapless::Vec;

use crate::config::Marker;
use crate::error::FrameError;
use crate::van;

/// Fixed-capacity buffer holding one frame's header, length, data and CRC bytes
pub type RawFrame = Vec<u8, { van::RAW_FRAME_CAPACITY }>;

/// Where the assembler is within a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FrameState {
    /// Ignoring bits until the bus goes idle
    Idle,
    /// Bus went idle; matching the start-of-frame marker
    Syncing,
    /// Reading identifier, flags and length
    Header,
    /// Reading data bytes
    Data,
    /// Reading the CRC field
    Crc,
    /// Matching the end-of-frame marker
    EndMarker,
}

impl FrameState {
    /// Whether a frame has started, i.e. the start marker has been seen
    pub fn in_frame(&self) -> bool {
        matches!(
            self,
            FrameState::Header | FrameState::Data | FrameState::Crc | FrameState::EndMarker
        )
    }
}

impl std::fmt::Display for FrameState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FrameState::Idle => "IDLE",
            FrameState::Syncing => "SYNCING",
            FrameState::Header => "READING_HEADER",
            FrameState::Data => "READING_DATA",
            FrameState::Crc => "READING_CRC",
            FrameState::EndMarker => "READING_END_MARKER",
        };
        f.write_str(name)
    }
}

/// Builds frames from de-stuffed bits
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    sof: Marker,
    eof: Marker,
    max_size: usize,
    state: FrameState,
    buffer: RawFrame,
    frame_len: usize,
    shift: u8,
    bits: u8,
    marker: u32,
    marker_seen: u8,
}

impl FrameAssembler {
    /// Create an assembler; `max_size` bounds the raw frame in bytes and is
    /// clamped to the buffer capacity
    pub fn new(sof: Marker, eof: Marker, max_size: usize) -> Self {
        FrameAssembler {
            sof,
            eof,
            max_size: max_size.min(van::RAW_FRAME_CAPACITY),
            state: FrameState::Idle,
            buffer: Vec::new(),
            frame_len: 0,
            shift: 0,
            bits: 0,
            marker: 0,
            marker_seen: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Bytes collected for the frame in progress
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop any frame in progress and wait for the next idle gap
    pub fn reset(&mut self) {
        self.clear();
        self.state = FrameState::Idle;
    }

    /// The bus went idle: a new frame may start with the next bit
    ///
    /// Reports [`FrameError::BusIdle`] if a frame was cut short.
    pub fn bus_idle(&mut self) -> Option<FrameError> {
        let truncated = self.state.in_frame();
        self.clear();
        self.state = FrameState::Syncing;
        truncated.then_some(FrameError::BusIdle)
    }

    /// Abandon the current frame because of a bit-level violation
    ///
    /// The error is passed back only if a frame was actually in progress.
    pub fn abort(&mut self, error: FrameError) -> Option<FrameError> {
        let in_frame = self.state.in_frame();
        self.reset();
        in_frame.then_some(error)
    }

    /// Feed one de-stuffed bit
    pub fn push_bit(&mut self, bit: bool) -> Option<Result<RawFrame, FrameError>> {
        match self.state {
            FrameState::Idle => None,
            FrameState::Syncing => {
                if !self.match_marker(self.sof, bit) {
                    // Not a frame start; keep scanning from the next gap
                    self.reset();
                } else if self.marker_seen == self.sof.len {
                    self.enter(FrameState::Header);
                }
                None
            }
            FrameState::Header | FrameState::Data | FrameState::Crc => {
                self.shift = (self.shift << 1) | u8::from(bit);
                self.bits += 1;
                if self.bits < 8 {
                    return None;
                }
                let byte = self.shift;
                self.shift = 0;
                self.bits = 0;
                self.accept_byte(byte).err().map(|e| self.fail(e))
            }
            FrameState::EndMarker => {
                if !self.match_marker(self.eof, bit) {
                    return Some(self.fail(FrameError::MarkerMismatch));
                }
                if self.marker_seen < self.eof.len {
                    return None;
                }
                let frame = std::mem::take(&mut self.buffer);
                self.reset();
                Some(Ok(frame))
            }
        }
    }

    fn accept_byte(&mut self, byte: u8) -> Result<(), FrameError> {
        if self.buffer.len() >= self.max_size || self.buffer.push(byte).is_err() {
            return Err(FrameError::FrameTooLong {
                size: self.buffer.len() + 1,
                max: self.max_size,
            });
        }

        match self.state {
            FrameState::Header => {
                if self.buffer.len() == van::HEADER_BYTES {
                    let len = usize::from(byte);
                    self.frame_len = van::MIN_FRAME_BYTES + len;
                    if self.frame_len > self.max_size {
                        return Err(FrameError::FrameTooLong {
                            size: self.frame_len,
                            max: self.max_size,
                        });
                    }
                    self.state = if len == 0 {
                        FrameState::Crc
                    } else {
                        FrameState::Data
                    };
                }
            }
            FrameState::Data => {
                if self.buffer.len() == self.frame_len - van::CRC_FIELD_BYTES {
                    self.state = FrameState::Crc;
                }
            }
            FrameState::Crc => {
                if self.buffer.len() == self.frame_len {
                    self.enter(FrameState::EndMarker);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn match_marker(&mut self, marker: Marker, bit: bool) -> bool {
        self.marker = (self.marker << 1) | u32::from(bit);
        self.marker_seen += 1;
        marker.prefix_matches(self.marker, self.marker_seen)
    }

    fn enter(&mut self, state: FrameState) {
        self.marker = 0;
        self.marker_seen = 0;
        self.state = state;
    }

    fn fail(&mut self, error: FrameError) -> Result<RawFrame, FrameError> {
        self.reset();
        Err(error)
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.frame_len = 0;
        self.shift = 0;
        self.bits = 0;
        self.marker = 0;
        self.marker_seen = 0;
    }
}
