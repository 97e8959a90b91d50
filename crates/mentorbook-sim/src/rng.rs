use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Seeded RNG driving every scheduling decision of a simulation run.
///
/// Two runs with the same seed make the same choices in the same order.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    inner: StdRng,
}

impl DeterministicRng {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            inner: StdRng::seed_from_u64(seed ^ 0x9E37_79B9_7F4A_7C15),
        }
    }

    /// Next value in `[0, upper_exclusive)`.
    #[must_use]
    pub fn next_bounded(&mut self, upper_exclusive: usize) -> usize {
        if upper_exclusive == 0 {
            return 0;
        }
        self.inner.gen_range(0..upper_exclusive)
    }

    /// Bernoulli trial with integer percent.
    #[must_use]
    pub fn hit_rate_percent(&mut self, percent: u8) -> bool {
        if percent == 0 {
            return false;
        }
        if percent >= 100 {
            return true;
        }
        self.inner.gen_range(0..100_u8) < percent
    }

    #[must_use]
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.inner)
    }
}
