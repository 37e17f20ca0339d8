//! Bit recovery from edge intervals
//!
//! Between two edges the line holds one level for a whole number of bit
//! periods. The recoverer decides how many, keeping a running estimate of
//! the transmitter's bit period so that oscillator mismatch between the
//! two ends does not push intervals out of tolerance.

use crate::edge::Level;

/// Fixed-point scale of the period estimate (1/256 us)
const FRACTION_BITS: u32 = 8;

/// The estimate moves 1/2^ADAPT_SHIFT of the way toward each observed single bit
const ADAPT_SHIFT: u32 = 3;

/// A run of identical bits recovered from one interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitRun {
    /// Bit value of every bit in the run
    pub value: bool,
    /// Bits left in the run
    pub count: u8,
}

impl Iterator for BitRun {
    type Item = bool;

    fn next(&mut self) -> Option<bool> {
        if self.count == 0 {
            return None;
        }
        self.count -= 1;
        Some(self.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (usize::from(self.count), Some(usize::from(self.count)))
    }
}

impl ExactSizeIterator for BitRun {}

/// Classification of one edge interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Interval within tolerance of a whole number of bit periods
    Bits(BitRun),
    /// Interval outside every tolerance window
    Violation { interval_us: u32 },
}

/// Turns edge intervals into bits
#[derive(Debug, Clone)]
pub struct BitRecoverer {
    nominal_q8: u32,
    window_q8: u32,
    min_q8: u32,
    max_q8: u32,
    period_q8: u32,
    max_run: u8,
}

impl BitRecoverer {
    /// Create a recoverer
    ///
    /// `tolerance` is the accepted deviation around each multiple of the
    /// period and `max_drift` bounds the adaptive estimate, both as
    /// fractions of `nominal_us`. Runs longer than `max_run` bits are
    /// violations.
    pub fn new(nominal_us: u32, tolerance: f32, max_drift: f32, max_run: u8) -> Self {
        let nominal_q8 = nominal_us << FRACTION_BITS;
        let window_q8 = (nominal_q8 as f32 * tolerance) as u32;
        let drift_q8 = (nominal_q8 as f32 * max_drift) as u32;
        BitRecoverer {
            nominal_q8,
            window_q8,
            min_q8: nominal_q8 - drift_q8,
            max_q8: nominal_q8 + drift_q8,
            period_q8: nominal_q8,
            max_run,
        }
    }

    /// Current bit period estimate in 1/256 microseconds
    pub fn period_q8(&self) -> u32 {
        self.period_q8
    }

    /// Nominal bit period in 1/256 microseconds
    pub fn nominal_q8(&self) -> u32 {
        self.nominal_q8
    }

    /// Restore the nominal period estimate
    pub fn resync(&mut self) {
        self.period_q8 = self.nominal_q8;
    }

    /// Classify an interval during which the line held `level`
    pub fn recover(&mut self, interval_us: u32, level: Level) -> Recovery {
        let observed_q8 = interval_us.saturating_mul(1 << FRACTION_BITS);

        for count in 1..=self.max_run {
            let target_q8 = self.period_q8 * u32::from(count);
            if observed_q8.abs_diff(target_q8) <= self.window_q8 {
                if count == 1 {
                    self.adapt(observed_q8);
                }
                return Recovery::Bits(BitRun {
                    value: level.as_bit(),
                    count,
                });
            }
        }

        Recovery::Violation { interval_us }
    }

    fn adapt(&mut self, observed_q8: u32) {
        let error = observed_q8 as i64 - self.period_q8 as i64;
        let adjusted = self.period_q8 as i64 + (error >> ADAPT_SHIFT);
        self.period_q8 = (adjusted as u32).clamp(self.min_q8, self.max_q8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recoverer() -> BitRecoverer {
        BitRecoverer::new(8, 0.25, 0.05, 2)
    }

    #[test]
    fn test_single_and_double_bits() {
        let mut rx = recoverer();
        assert_eq!(
            rx.recover(8, Level::Low),
            Recovery::Bits(BitRun {
                value: false,
                count: 1
            })
        );
        assert_eq!(
            rx.recover(16, Level::High),
            Recovery::Bits(BitRun {
                value: true,
                count: 2
            })
        );
    }

    #[test]
    fn test_tolerance_window() {
        let mut rx = recoverer();
        // +-2 us around each multiple of 8 us
        assert!(matches!(rx.recover(10, Level::Low), Recovery::Bits(BitRun { count: 1, .. })));
        rx.resync();
        assert!(matches!(rx.recover(6, Level::Low), Recovery::Bits(BitRun { count: 1, .. })));
        rx.resync();
        assert!(matches!(rx.recover(18, Level::Low), Recovery::Bits(BitRun { count: 2, .. })));
        assert_eq!(
            rx.recover(12, Level::Low),
            Recovery::Violation { interval_us: 12 }
        );
        assert_eq!(rx.recover(3, Level::Low), Recovery::Violation { interval_us: 3 });
    }

    #[test]
    fn test_triple_period_is_violation() {
        let mut rx = recoverer();
        assert_eq!(
            rx.recover(24, Level::High),
            Recovery::Violation { interval_us: 24 }
        );
    }

    #[test]
    fn test_longer_runs_with_enhanced_manchester() {
        let mut rx = BitRecoverer::new(8, 0.25, 0.05, 5);
        assert!(matches!(rx.recover(40, Level::High), Recovery::Bits(BitRun { count: 5, .. })));
        assert!(matches!(rx.recover(48, Level::High), Recovery::Violation { .. }));
    }

    #[test]
    fn test_period_adapts_within_bounds() {
        let mut rx = recoverer();
        let nominal = rx.nominal_q8();
        for _ in 0..100 {
            rx.recover(9, Level::Low);
        }
        assert!(rx.period_q8() > nominal);
        assert!(rx.period_q8() <= nominal + nominal / 20);

        rx.resync();
        assert_eq!(rx.period_q8(), nominal);

        for _ in 0..100 {
            rx.recover(7, Level::Low);
        }
        assert!(rx.period_q8() < nominal);
        assert!(rx.period_q8() >= nominal - nominal / 20);
    }

    #[test]
    fn test_exact_intervals_keep_period() {
        let mut rx = recoverer();
        for _ in 0..10 {
            rx.recover(8, Level::Low);
        }
        assert_eq!(rx.period_q8(), 8 << 8);
    }

    #[test]
    fn test_bit_run_iterates() {
        let run = BitRun {
            value: true,
            count: 2,
        };
        assert_eq!(run.len(), 2);
        assert_eq!(run.collect::<Vec<_>>(), vec![true, true]);
    }
}
