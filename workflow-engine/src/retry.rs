//! Retry policy: exponential backoff with jitter.
//!
//! Base 1 s, factor 2, at most 5 attempts. Jitter is uniform up to half the
//! base delay so synchronized retries across workflows spread out.

use std::time::Duration;

use rand::Rng;

pub const MAX_ATTEMPTS: u32 = 5;
const BASE: Duration = Duration::from_secs(1);

/// Delay before retry number `attempt` (1-based). `None` when the attempt
/// budget is exhausted.
pub fn delay_for(attempt: u32) -> Option<Duration> {
    if attempt >= MAX_ATTEMPTS {
        return None;
    }
    let base = BASE.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let jitter_ms = rand::thread_rng().gen_range(0..=(base.as_millis() as u64 / 2).max(1));
    Some(base + Duration::from_millis(jitter_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_with_bounded_jitter() {
        for _ in 0..50 {
            let d1 = delay_for(1).expect("first");
            let d2 = delay_for(2).expect("second");
            let d3 = delay_for(3).expect("third");

            assert!(d1 >= Duration::from_secs(1) && d1 <= Duration::from_millis(1_500));
            assert!(d2 >= Duration::from_secs(2) && d2 <= Duration::from_secs(3));
            assert!(d3 >= Duration::from_secs(4) && d3 <= Duration::from_secs(6));
        }
    }

    #[test]
    fn attempts_are_capped_at_five() {
        assert!(delay_for(4).is_some());
        assert!(delay_for(5).is_none());
        assert!(delay_for(99).is_none());
    }
}
