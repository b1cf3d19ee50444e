//! # Poll budget
//!
//! Fixed-interval retry budget for `wait_for_completion`-style loops: after
//! a mutation, the resource is re-read until it reaches the expected state or
//! the budget runs out.
//!
//! Default budget: 25 attempts, 15 seconds apart.

use std::time::Duration;

/// Fixed-interval poll budget
#[derive(Debug, Clone)]
pub struct PollBudget {
    /// Pause between two reads
    interval: Duration,
    /// Reads left
    remaining: u32,
    /// Total reads allowed
    attempts: u32,
}

impl Default for PollBudget {
    fn default() -> Self {
        Self::new(25, Duration::from_secs(15))
    }
}

impl PollBudget {
    /// Budget of `attempts` reads, `interval` apart
    #[must_use]
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            interval,
            remaining: attempts,
            attempts,
        }
    }

    /// Consume one attempt; `false` once the budget is exhausted
    pub fn try_consume(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    /// Sleep for one interval
    pub async fn pause(&self) {
        tokio::time::sleep(self.interval).await;
    }

    /// Seconds covered by the whole budget, for error messages
    pub fn total_seconds(&self) -> u64 {
        self.interval.as_secs() * u64::from(self.attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_is_consumed() {
        let mut budget = PollBudget::new(2, Duration::from_secs(1));
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        assert!(!budget.try_consume());
    }

    #[test]
    fn test_default_budget() {
        let budget = PollBudget::default();
        assert_eq!(budget.total_seconds(), 375);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_advances_clock() {
        let budget = PollBudget::new(1, Duration::from_secs(15));
        let start = tokio::time::Instant::now();
        budget.pause().await;
        assert!(start.elapsed() >= Duration::from_secs(15));
    }
}
