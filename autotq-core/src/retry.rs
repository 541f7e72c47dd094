//! Bounded retry schedules
//!
//! Used for port opening (growing backoff) and for query commands (fixed
//! pause). The policy only describes attempts and delays; callers do the
//! sleeping on whatever runtime they use.

use std::time::Duration;

use crate::constants::{
    COMMAND_ATTEMPTS, COMMAND_RETRY_MS, OPEN_ATTEMPTS, OPEN_RETRY_BASE_MS, OPEN_RETRY_STEP_MS,
};

/// Attempt bound plus a linear delay schedule
///
/// The delay before retry `n` (1-based, counting retries not attempts) is
/// `base + (n - 1) * step`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use autotq_core::RetryPolicy;
///
/// let policy = RetryPolicy::new(4, Duration::from_millis(1500))
///     .with_step(Duration::from_millis(500));
///
/// let delays: Vec<_> = policy.delays().collect();
/// assert_eq!(delays, vec![
///     Duration::from_millis(1500),
///     Duration::from_millis(2000),
///     Duration::from_millis(2500),
/// ]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    step: Duration,
}

impl RetryPolicy {
    /// Create a policy with a fixed delay between attempts
    ///
    /// `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            step: Duration::ZERO,
        }
    }

    /// Single attempt, never retried
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Port open schedule: 1.5s, 2.0s, 2.5s, ...
    pub fn port_open() -> Self {
        Self::new(OPEN_ATTEMPTS, Duration::from_millis(OPEN_RETRY_BASE_MS))
            .with_step(Duration::from_millis(OPEN_RETRY_STEP_MS))
    }

    /// Query command schedule
    pub fn command() -> Self {
        Self::new(COMMAND_ATTEMPTS, Duration::from_millis(COMMAND_RETRY_MS))
    }

    /// Grow the delay by `step` after every retry
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay to wait after failed attempt `attempt` (1-based)
    ///
    /// Returns `None` once the attempt budget is spent.
    pub fn delay_after(&self, attempt: usize) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }
        let retries = u32::try_from(attempt - 1).unwrap_or(u32::MAX);
        Some(self.base_delay + self.step.saturating_mul(retries))
    }

    /// All delays in order
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.max_attempts).filter_map(|attempt| self.delay_after(attempt))
    }

    /// Sum of all delays
    pub fn total_delay(&self) -> Duration {
        self.delays().sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::command()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_port_open_schedule() {
        let policy = RetryPolicy::port_open();
        let delays: Vec<u64> = policy.delays().map(|d| d.as_millis() as u64).collect();

        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(delays, vec![1500, 2000, 2500, 3000]);
        assert_eq!(policy.total_delay(), Duration::from_millis(9000));
    }

    #[test]
    fn test_fixed_schedule() {
        let policy = RetryPolicy::command();
        let delays: Vec<Duration> = policy.delays().collect();

        assert_eq!(delays, vec![Duration::from_millis(250); 2]);
    }

    #[test]
    fn test_budget_exhausted() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        assert!(policy.delay_after(1).is_some());
        assert!(policy.delay_after(2).is_some());
        assert_eq!(policy.delay_after(3), None);
        assert_eq!(policy.delay_after(0), None);
    }

    #[test]
    fn test_once_never_retries() {
        let policy = RetryPolicy::once();
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delays().count(), 0);
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
        assert_eq!(RetryPolicy::once().with_max_attempts(0).max_attempts(), 1);
    }
}
