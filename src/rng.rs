//! A seedable PRNG wrapper so the scheduler's randomized tie-breaks (§4.3,
//! §8 "piece-priority ordering is a total order under a fixed random seed")
//! are reproducible in tests while still being unpredictable in production.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct Rng(StdRng);

impl Rng {
    pub fn from_entropy() -> Self {
        Self(StdRng::from_entropy())
    }

    pub fn from_seed(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }

    pub fn gen_range(&mut self, range: std::ops::Range<usize>) -> usize {
        self.0.gen_range(range)
    }

    pub fn gen_bool(&mut self, p: f64) -> bool {
        self.0.gen_bool(p)
    }

    /// Fisher-Yates shuffle, used to break ties among equally-ranked pieces
    /// or optimistic-unchoke candidates so that repeated runs don't always
    /// favor the lowest index.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        for i in (1..slice.len()).rev() {
            let j = self.gen_range(0..i + 1);
            slice.swap(i, j);
        }
    }
}

impl Default for Rng {
    fn default() -> Self {
        Self::from_entropy()
    }
}
