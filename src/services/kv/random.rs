//! Injectable randomness for `spop`.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of uniform draws over `0..len`.
pub trait RandomSource: Send + Sync + 'static {
    /// Returns an index in `0..len`. `len` is never zero.
    fn pick_index(&self, len: usize) -> usize;
}

/// Thread-local OS-seeded generator. Default for production.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn pick_index(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

/// Deterministic generator for tests and reproducible runs.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn pick_index(&self, len: usize) -> usize {
        self.rng.lock().gen_range(0..len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_is_deterministic() {
        let a = SeededRandom::new(42);
        let b = SeededRandom::new(42);
        let draws_a: Vec<usize> = (0..32).map(|_| a.pick_index(10)).collect();
        let draws_b: Vec<usize> = (0..32).map(|_| b.pick_index(10)).collect();
        assert_eq!(draws_a, draws_b);
    }

    #[test]
    fn test_draws_stay_in_range() {
        let rng = ThreadRandom;
        for len in 1..50 {
            assert!(rng.pick_index(len) < len);
        }
    }
}
