//! Retry backoff policy: exponential growth, capped, with jitter.

use rand::Rng;
use std::time::Duration;

const MAX_EXPONENT: u32 = 8;

/// Deterministic exponential delay in milliseconds: `base * 2^attempts`, capped.
pub fn backoff_delay_ms(attempt_count: i32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let exp = attempt_count.clamp(0, MAX_EXPONENT as i32) as u32;
    base_delay_ms
        .saturating_mul(1_u64 << exp)
        .min(max_delay_ms)
}

/// Backoff with random jitter (up to a fifth of the delay) added on top, so a
/// burst of failed operations does not retry in lockstep.
pub fn backoff_with_jitter(attempt_count: i32, base_delay_ms: u64, max_delay_ms: u64) -> Duration {
    let backoff = backoff_delay_ms(attempt_count, base_delay_ms, max_delay_ms);
    let jitter = rand::thread_rng().gen_range(0..=(backoff / 5).max(1));
    Duration::from_millis(backoff.saturating_add(jitter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        assert_eq!(backoff_delay_ms(0, 2_000, 300_000), 2_000);
        assert_eq!(backoff_delay_ms(1, 2_000, 300_000), 4_000);
        assert_eq!(backoff_delay_ms(2, 2_000, 300_000), 8_000);
        assert_eq!(backoff_delay_ms(9, 2_000, 300_000), backoff_delay_ms(8, 2_000, 300_000));
        assert_eq!(backoff_delay_ms(20, 2_000, 300_000), 300_000);
    }

    #[test]
    fn delays_are_non_decreasing_in_attempt_count() {
        let delays: Vec<u64> = (0..12).map(|n| backoff_delay_ms(n, 2_000, 300_000)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn jitter_stays_within_a_fifth_of_the_delay() {
        for attempt in 0..6 {
            let base = backoff_delay_ms(attempt, 2_000, 300_000);
            let jittered = backoff_with_jitter(attempt, 2_000, 300_000).as_millis() as u64;
            assert!(jittered >= base);
            assert!(jittered <= base + (base / 5).max(1));
        }
    }
}
