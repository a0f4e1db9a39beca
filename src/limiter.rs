//! Emission pacing for streamed tokens.
//!
//! The limiter holds a running target time that advances by a fixed
//! `1 / rate` per token. A token arriving ahead of its target sleeps the
//! difference; a late token passes through immediately. The target is never
//! reset to the current time, so after a stall the accumulated slack lets
//! following tokens flow unpaced until the grid overtakes the clock again.

use std::time::{Duration, Instant};

use crate::error::{GenError, Result};

/// Caps the steady-state emission rate at a fixed tokens-per-second.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    target: Option<Instant>,
}

impl RateLimiter {
    /// # Errors
    /// Returns [`GenError::Config`] unless `tokens_per_second` is a finite
    /// positive number.
    pub fn new(tokens_per_second: f64) -> Result<Self> {
        if !tokens_per_second.is_finite() || tokens_per_second <= 0.0 {
            return Err(GenError::Config(format!(
                "max_tokens_per_second must be a positive number, got {tokens_per_second}"
            )));
        }
        Ok(RateLimiter {
            interval: Duration::from_secs_f64(1.0 / tokens_per_second),
            target: None,
        })
    }

    /// Block until this token's target time, then advance the target.
    ///
    /// The first call is free: it primes the target at the current instant,
    /// so pacing constrains the gaps between tokens rather than delaying
    /// the first one.
    pub fn pace(&mut self) {
        let now = Instant::now();
        match self.target {
            None => {
                self.target = Some(now + self.interval);
            }
            Some(target) => {
                if let Some(wait) = target.checked_duration_since(now) {
                    std::thread::sleep(wait);
                }
                self.target = Some(target + self.interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn rejects_non_positive_rates() {
        assert!(RateLimiter::new(0.0).is_err());
        assert!(RateLimiter::new(-5.0).is_err());
        assert!(RateLimiter::new(f64::NAN).is_err());
        assert!(RateLimiter::new(f64::INFINITY).is_err());
        assert!(RateLimiter::new(1000.0).is_ok());
    }

    #[test]
    fn first_token_is_not_delayed() {
        let mut limiter = RateLimiter::new(2.0).unwrap();
        let start = Instant::now();
        limiter.pace();
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn n_tokens_take_at_least_n_minus_one_intervals() {
        let mut limiter = RateLimiter::new(50.0).unwrap();
        let start = Instant::now();
        for _ in 0..4 {
            limiter.pace();
        }
        // 4 tokens at 50/s span at least 3 * 20ms.
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn late_tokens_pass_until_grid_catches_up() {
        let mut limiter = RateLimiter::new(100.0).unwrap();
        limiter.pace();
        // Fall far behind the 10ms grid.
        std::thread::sleep(Duration::from_millis(50));
        // Targets lag the clock now, so these calls must not block.
        let start = Instant::now();
        limiter.pace();
        limiter.pace();
        let gap = start.elapsed();
        assert!(gap < Duration::from_millis(5), "late tokens should not block, took {gap:?}");
    }
}
