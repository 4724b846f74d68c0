// Retry backoff
//
// Exponential with jitter: base 500ms doubling per attempt, capped at 8s,
// then spread uniformly over [half, 1.5x] so simultaneous attempts across
// files do not synchronize. The curve is a stated contract of the retry
// policy, not a tuning knob hidden in call sites.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

#[derive(Debug)]
pub struct Backoff {
    base_ms: u64,
    cap_ms: u64,
    rng: SmallRng,
}

impl Backoff {
    pub fn new(base_ms: u64, cap_ms: u64) -> Self {
        Self {
            base_ms: base_ms.max(1),
            cap_ms: cap_ms.max(base_ms.max(1)),
            rng: SmallRng::from_entropy(),
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay(&mut self, attempt: u32) -> Duration {
        let exp = self
            .base_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.cap_ms);
        let jittered = exp / 2 + self.rng.gen_range(0..=exp);
        Duration::from_millis(jittered.min(self.cap_ms.saturating_mul(3) / 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let mut backoff = Backoff::new(500, 8_000);
        for attempt in 0..10 {
            let exp = 500_u64.saturating_mul(2_u64.pow(attempt)).min(8_000);
            let d = backoff.delay(attempt).as_millis() as u64;
            assert!(d >= exp / 2, "attempt {attempt}: {d} < {}", exp / 2);
            assert!(d <= exp * 3 / 2, "attempt {attempt}: {d} > {}", exp * 3 / 2);
        }
    }

    #[test]
    fn test_zero_base_is_clamped() {
        let mut backoff = Backoff::new(0, 0);
        // No panic, and the delay stays tiny.
        assert!(backoff.delay(5).as_millis() <= 2);
    }
}
