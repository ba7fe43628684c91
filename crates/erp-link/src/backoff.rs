//! Exponential reconnect backoff.

use std::time::Duration;

/// `delay = min(max, base * decay^attempts)`, with `attempts` counting
/// reconnections scheduled since the last successful open.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    base: Duration,
    max: Duration,
    decay: f64,
    attempts: u32,
}

impl Backoff {
    pub(crate) fn new(base: Duration, max: Duration, decay: f64) -> Self {
        Self {
            base,
            max,
            decay,
            attempts: 0,
        }
    }

    /// Delay for the next reconnection; bumps the attempt counter.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let exp = i32::try_from(self.attempts).unwrap_or(i32::MAX);
        let scaled = self.base.as_secs_f64() * self.decay.powi(exp);
        let delay = if scaled.is_finite() && scaled < self.max.as_secs_f64() {
            Duration::from_secs_f64(scaled)
        } else {
            self.max
        };
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn reset(&mut self) {
        self.attempts = 0;
    }
}
