//! Capped exponential backoff shared by the planner and the engine.

use std::time::Duration;

/// Delay before the next attempt, doubling per completed attempt and capped.
///
/// `attempt` is the 1-based count of attempts already made; the first retry
/// therefore waits `base`, the second `2 * base`, and so on up to `cap`.
pub fn retry_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let multiplier = 1u64 << exponent;
    let delay = base.saturating_mul(multiplier.min(u32::MAX as u64) as u32);
    delay.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_per_attempt() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_secs(10);
        assert_eq!(retry_delay(1, base, cap), Duration::from_millis(100));
        assert_eq!(retry_delay(2, base, cap), Duration::from_millis(200));
        assert_eq!(retry_delay(3, base, cap), Duration::from_millis(400));
    }

    #[test]
    fn delays_are_capped() {
        let base = Duration::from_millis(500);
        let cap = Duration::from_secs(2);
        assert_eq!(retry_delay(10, base, cap), cap);
        assert_eq!(retry_delay(60, base, cap), cap, "large attempt counts must not overflow");
    }
}
