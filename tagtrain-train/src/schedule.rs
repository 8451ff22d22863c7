//! Hyperparameter schedules.
//!
//! A [`Schedule`] is an unbounded sequence of scalar values. The value of
//! step `n` is computed in closed form from the counter, so the sequence is
//! free of accumulated rounding drift and can only be restarted by building
//! a new schedule.

use tagtrain_core::TrainSettings;

/// Growth or decay law of a [`Schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Law {
    /// `start - n * rate`, not crossing `stop`.
    Decaying,
    /// `start * rate^n`, capped at `stop`.
    Compounding,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    law: Law,
    start: f64,
    stop: Option<f64>,
    rate: f64,
    step: u64,
}

impl Schedule {
    pub fn decaying(start: f64, stop: Option<f64>, rate: f64) -> Self {
        Self::new(Law::Decaying, start, stop, rate)
    }

    pub fn compounding(start: f64, stop: Option<f64>, rate: f64) -> Self {
        Self::new(Law::Compounding, start, stop, rate)
    }

    fn new(law: Law, start: f64, stop: Option<f64>, rate: f64) -> Self {
        Self {
            law,
            start,
            stop,
            rate,
            step: 0,
        }
    }

    /// Value at step `n`, independent of the cursor.
    pub fn value_at(&self, n: u64) -> f64 {
        let n = n as f64;
        match self.law {
            Law::Decaying => {
                let v = self.start - n * self.rate;
                self.stop.map_or(v, |stop| v.max(stop))
            }
            Law::Compounding => {
                let v = self.start * self.rate.powf(n);
                self.stop.map_or(v, |stop| v.min(stop))
            }
        }
    }

    /// Number of values drawn so far.
    pub fn steps_taken(&self) -> u64 {
        self.step
    }

    /// Draw the current value and move the cursor one step.
    pub fn advance(&mut self) -> f64 {
        let value = self.value_at(self.step);
        self.step += 1;
        value
    }
}

impl Iterator for Schedule {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        Some(self.advance())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (usize::MAX, None)
    }
}

/// Dropout schedule: decays from `dropout_from` toward `dropout_to`.
pub fn dropout_schedule(settings: &TrainSettings) -> Schedule {
    Schedule::decaying(
        settings.dropout_from,
        settings.dropout_to,
        settings.dropout_decay,
    )
}

/// Batch-size schedule: compounds from `batch_from` toward `batch_to`.
pub fn batch_size_schedule(settings: &TrainSettings) -> Schedule {
    Schedule::compounding(
        settings.batch_from,
        settings.batch_to,
        settings.batch_compound,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decaying_clamps_at_floor() {
        let values: Vec<f64> = Schedule::decaying(0.5, Some(0.2), 0.1).take(6).collect();
        let expected = [0.5, 0.4, 0.3, 0.2, 0.2, 0.2];
        for (v, e) in values.iter().zip(expected) {
            assert!((v - e).abs() < 1e-12, "{v} != {e}");
        }
    }

    #[test]
    fn test_decaying_without_floor_goes_negative() {
        let mut s = Schedule::decaying(0.1, None, 0.1);
        s.advance();
        s.advance();
        assert!(s.advance() < 0.0);
    }

    #[test]
    fn test_compounding_caps_at_ceiling() {
        let values: Vec<f64> = Schedule::compounding(1.0, Some(10.0), 2.0).take(6).collect();
        assert_eq!(values, vec![1.0, 2.0, 4.0, 8.0, 10.0, 10.0]);
    }

    #[test]
    fn test_default_settings_are_constant() {
        let settings = TrainSettings::default();
        let mut dropout = dropout_schedule(&settings);
        let mut batch = batch_size_schedule(&settings);
        for _ in 0..100 {
            assert_eq!(dropout.advance(), 0.2);
            assert_eq!(batch.advance(), 1000.0);
        }
        assert_eq!(dropout.steps_taken(), 100);
    }

    #[test]
    fn test_first_value_is_start() {
        assert_eq!(Schedule::compounding(4.0, None, 1.5).advance(), 4.0);
        assert_eq!(Schedule::decaying(0.3, None, 0.01).advance(), 0.3);
    }
}
