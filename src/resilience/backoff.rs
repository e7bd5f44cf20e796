//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before retry number `attempt + 1` (attempt is 0-indexed).
///
/// `min(base * 2^attempt + jitter(0..jitter_max), cap)`
pub fn calculate_backoff(attempt: u32, base: Duration, jitter_max: Duration, cap: Duration) -> Duration {
    let jitter_ms = jitter_max.as_millis() as u64;
    let jitter = if jitter_ms > 0 {
        rand::thread_rng().gen_range(0..jitter_ms)
    } else {
        0
    };

    let delay_ms = exponential_ms(attempt, base).saturating_add(jitter);
    Duration::from_millis(delay_ms).min(cap)
}

fn exponential_ms(attempt: u32, base: Duration) -> u64 {
    let factor = 2u64.saturating_pow(attempt);
    (base.as_millis() as u64).saturating_mul(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);
    const CAP: Duration = Duration::from_secs(30);

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let b0 = calculate_backoff(0, SECOND, SECOND, CAP);
        assert!(b0 >= SECOND && b0 < 2 * SECOND);

        let b2 = calculate_backoff(2, SECOND, SECOND, CAP);
        assert!(b2 >= 4 * SECOND && b2 < 5 * SECOND);
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(calculate_backoff(10, SECOND, SECOND, CAP), CAP);
        assert_eq!(calculate_backoff(u32::MAX, SECOND, SECOND, CAP), CAP);
    }

    #[test]
    fn test_no_jitter_is_exact() {
        let b = calculate_backoff(3, Duration::from_millis(100), Duration::ZERO, CAP);
        assert_eq!(b, Duration::from_millis(800));
    }
}
