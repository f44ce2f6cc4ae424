use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Wall clock in epoch milliseconds that advances with the tokio clock.
///
/// Deadlines are stamped with [`Clock::now_ms`] while timers sleep on tokio time, so both agree
/// even when the runtime clock is paused in tests.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin_ms: u64,
    origin: Instant,
}

impl Clock {
    /// Anchor the clock to the current system time.
    pub fn system() -> Self {
        let origin_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Self::starting_at(origin_ms)
    }

    /// Anchor the clock to an arbitrary epoch timestamp.
    pub fn starting_at(origin_ms: u64) -> Self {
        Self {
            origin_ms,
            origin: Instant::now(),
        }
    }

    /// Current time in epoch milliseconds.
    pub fn now_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.origin_ms.saturating_add(elapsed)
    }

    /// Time left until `at_ms`, zero when it already passed.
    pub fn until(&self, at_ms: u64) -> Duration {
        Duration::from_millis(at_ms.saturating_sub(self.now_ms()))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn follows_virtual_time() {
        let clock = Clock::starting_at(1_000);
        tokio::time::advance(Duration::from_millis(2_500)).await;

        assert_eq!(clock.now_ms(), 3_500);
        assert_eq!(clock.until(5_000), Duration::from_millis(1_500));
        assert_eq!(clock.until(10), Duration::ZERO);
    }
}
