//! Bit stuffing and de-stuffing
//!
//! The transmitter inserts a complementary bit according to a
//! [`StuffingRule`] so the line never holds one level for long. The
//! receiver drops those bits again and treats a stuffing bit with the wrong
//! polarity as a protocol violation.

use crate::config::StuffingRule;
use crate::error::FrameError;

/// Removes stuffing bits from the received bit stream
#[derive(Debug, Clone)]
pub struct Destuffer {
    rule: StuffingRule,
    last: bool,
    run: u8,
    expect_stuff: bool,
}

impl Destuffer {
    /// Create a de-stuffer for the given rule
    pub fn new(rule: StuffingRule) -> Self {
        Destuffer {
            rule,
            last: false,
            run: 0,
            expect_stuff: false,
        }
    }

    /// Start over at a frame boundary
    pub fn reset(&mut self) {
        self.last = false;
        self.run = 0;
        self.expect_stuff = false;
    }

    /// Feed one wire bit
    ///
    /// Returns the payload bit, `None` for a dropped stuffing bit, or a
    /// [`FrameError::StuffingViolation`] if a stuffing bit was due and the
    /// line did not change.
    pub fn push(&mut self, bit: bool) -> Result<Option<bool>, FrameError> {
        if self.expect_stuff {
            self.expect_stuff = false;
            if bit == self.last {
                return Err(FrameError::StuffingViolation);
            }
            self.last = bit;
            self.run = 0;
            return Ok(None);
        }

        self.run = match self.rule {
            StuffingRule::RunLength(_) if self.run > 0 && bit != self.last => 1,
            _ => self.run + 1,
        };
        self.last = bit;

        if self.run == self.rule.period() {
            self.expect_stuff = true;
        }
        Ok(Some(bit))
    }
}

/// Inserts stuffing bits; the mirror image of [`Destuffer`]
#[derive(Debug, Clone)]
pub struct Stuffer {
    rule: StuffingRule,
    last: bool,
    run: u8,
}

impl Stuffer {
    /// Create a stuffer for the given rule
    pub fn new(rule: StuffingRule) -> Self {
        Stuffer {
            rule,
            last: false,
            run: 0,
        }
    }

    /// Append one payload bit, plus a stuffing bit if one is due
    pub fn push(&mut self, bit: bool, out: &mut Vec<bool>) {
        self.run = match self.rule {
            StuffingRule::RunLength(_) if self.run > 0 && bit != self.last => 1,
            _ => self.run + 1,
        };
        self.last = bit;
        out.push(bit);

        if self.run == self.rule.period() {
            out.push(!bit);
            self.last = !bit;
            self.run = 0;
        }
    }

    /// Stuff a whole payload bit sequence
    pub fn stuff(rule: StuffingRule, bits: &[bool]) -> Vec<bool> {
        let mut stuffer = Stuffer::new(rule);
        let mut out = Vec::with_capacity(bits.len() * 2);
        for &bit in bits {
            stuffer.push(bit, &mut out);
        }
        out
    }
}
