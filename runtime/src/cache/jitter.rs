//! Jittered TTLs.
//!
//! Every cache write draws its own TTL from `base + uniform(0..=window)`, so
//! entries written together (a bulk warm-up, the replicas of one hot key) do
//! not expire together.

use rand::Rng;
use std::time::Duration;

/// TTL sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlJitter {
    base: Duration,
    window: Duration,
}

impl TtlJitter {
    /// Sampler for `base + uniform(0..=window)`.
    #[must_use]
    pub const fn new(base: Duration, window: Duration) -> Self {
        Self { base, window }
    }

    /// Smallest possible TTL.
    #[must_use]
    pub const fn base(&self) -> Duration {
        self.base
    }

    /// Width of the jitter window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Draw a TTL with the thread-local RNG.
    #[must_use]
    pub fn sample(&self) -> Duration {
        self.sample_with(&mut rand::thread_rng())
    }

    /// Draw a TTL with `rng`.
    pub fn sample_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let window_ms = u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX);
        if window_ms == 0 {
            return self.base;
        }
        self.base + Duration::from_millis(rng.gen_range(0..=window_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn samples_stay_in_window() {
        let jitter = TtlJitter::new(Duration::from_secs(300), Duration::from_secs(60));
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let ttl = jitter.sample_with(&mut rng);
            assert!(ttl >= Duration::from_secs(300));
            assert!(ttl <= Duration::from_secs(360));
        }
    }

    #[test]
    fn samples_spread_across_window() {
        let jitter = TtlJitter::new(Duration::from_secs(300), Duration::from_secs(60));
        let mut rng = StdRng::seed_from_u64(11);
        let mut buckets = [0_usize; 6];
        for _ in 0..6_000 {
            let offset = jitter.sample_with(&mut rng) - Duration::from_secs(300);
            let bucket = usize::try_from(offset.as_secs() / 10).unwrap_or(5).min(5);
            buckets[bucket] += 1;
        }
        // Each 10s slice should get roughly 1/6 of the draws.
        assert!(buckets.iter().all(|count| *count > 700), "{buckets:?}");
    }

    #[test]
    fn zero_window_is_exact() {
        let jitter = TtlJitter::new(Duration::from_secs(5), Duration::ZERO);
        assert_eq!(jitter.sample(), Duration::from_secs(5));
    }
}
