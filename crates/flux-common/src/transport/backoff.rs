use std::time::Duration;

const STEP_MS: u64 = 1000;
const FACTOR: f64 = 1.1;

/// Reconnect delay schedule.
///
/// The first retry is immediate; each later one waits
/// `(previous + 1s) * 1.1`. A successful connection resets the schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Backoff {
    delay_ms: u64,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// The delay the next retry will wait.
    pub fn current(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Take the delay for this retry and advance the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current();
        self.delay_ms = (self.delay_ms.saturating_add(STEP_MS) as f64 * FACTOR) as u64;
        delay
    }

    pub fn reset(&mut self) {
        self.delay_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_retry_is_immediate() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }

    #[test]
    fn test_delays_grow() {
        let mut backoff = Backoff::new();
        let delays: Vec<_> = (0..4).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![0, 1100, 2310, 3641]);
    }

    #[test]
    fn test_reset_returns_to_zero() {
        let mut backoff = Backoff::new();
        backoff.next_delay();
        backoff.next_delay();
        assert!(backoff.current() > Duration::ZERO);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }
}
