use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seeded Gaussian noise owned by a single simulation run.
///
/// Two runs with the same seed draw the same sequence; runs never share a
/// generator, so concurrent runs cannot perturb each other.
pub struct NoiseSource {
    rng: ChaCha8Rng,
}

impl NoiseSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Sample N(0, std_dev²). A zero standard deviation returns exactly 0.0
    /// without consuming randomness.
    pub fn gaussian(&mut self, std_dev: f64) -> f64 {
        if std_dev == 0.0 {
            return 0.0;
        }
        // Box-Muller; `1 - u` keeps the log argument in (0, 1].
        let u1: f64 = 1.0 - self.rng.gen::<f64>();
        let u2: f64 = self.rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        std_dev * z
    }
}
