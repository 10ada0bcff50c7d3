//! Random response delays.

use std::time::Duration;

use rand::distributions::{Distribution, Uniform};

use crate::backend::DelayError;

/// Draws pauses uniformly from `[min, max]` milliseconds.
#[derive(Debug, Clone)]
pub struct PauseGenerator {
    range: Uniform<u64>,
}

impl PauseGenerator {
    pub fn new(min_ms: u64, max_ms: u64) -> Result<Self, DelayError> {
        if min_ms == 0 {
            return Err(DelayError::InvalidPause("minimal pause must be greater than 0"));
        }
        if max_ms == 0 {
            return Err(DelayError::InvalidPause("maximal pause must be greater than 0"));
        }
        if max_ms < min_ms {
            return Err(DelayError::InvalidPause(
                "maximal pause must not be less than minimal pause",
            ));
        }
        Ok(Self {
            range: Uniform::new_inclusive(min_ms, max_ms),
        })
    }

    pub fn next(&self) -> Duration {
        Duration::from_millis(self.range.sample(&mut rand::thread_rng()))
    }
}
