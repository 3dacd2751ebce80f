use std::time::Duration;

/// Longest wait between two reconnect attempts.
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// Delays between reconnect attempts: the initial delay, doubled after
/// every failure up to [`MAX_DELAY`], optionally for a bounded number of
/// attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max_attempts: Option<u32>,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            initial: initial.min(MAX_DELAY),
            max_attempts,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the attempts are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| self.attempts >= max) {
            return None;
        }
        let factor = 1u32.checked_shl(self.attempts.min(31)).unwrap_or(u32::MAX);
        let delay = self
            .initial
            .checked_mul(factor)
            .map_or(MAX_DELAY, |d| d.min(MAX_DELAY));
        self.attempts += 1;
        Some(delay)
    }

    /// Starts over after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
