use rand::{rngs::StdRng, Rng, SeedableRng};

/// Seed for the stream a fresh machine starts with. A fixed seed keeps
/// runs reproducible until a game asks for real randomness.
const DEFAULT_SEED: u64 = 123_456;

/// Random number source for the `random` opcode. One per machine; games
/// can reseed it deterministically (negative operand) or from the
/// operating system (zero operand).
pub struct ZRand {
    rng: StdRng,
}

impl ZRand {
    pub fn new() -> ZRand {
        ZRand {
            rng: StdRng::seed_from_u64(DEFAULT_SEED),
        }
    }

    /// Restart the stream from a fixed seed.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Restart the stream from an unpredictable source.
    pub fn reseed_entropy(&mut self) {
        self.rng = StdRng::from_entropy();
    }

    /// Uniform draw in `[1, max]`. `max` must be positive.
    pub fn draw(&mut self, max: i16) -> u16 {
        debug_assert!(max > 0);
        self.rng.gen_range(1..=max) as u16
    }
}

impl Default for ZRand {
    fn default() -> Self {
        Self::new()
    }
}
