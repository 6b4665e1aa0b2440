//! Fault-injection overlay.
//!
//! Each fault fires independently with its configured probability, driven by
//! a seeded [`StdRng`] so a chaos run can be replayed exactly.  With every
//! rate at zero the overlay is transparent.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChaosConfig {
    /// Probability an exec is reported as timed out without running.
    pub timeout_rate: f64,
    /// Probability a write is denied with `EACCES`.
    pub eacces_rate: f64,
    /// Probability exec output is flooded with noise.
    pub flood_rate: f64,
    pub seed: Option<u64>,
    /// Noise characters appended on a flood.
    pub flood_chars: usize,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            timeout_rate: 0.0,
            eacces_rate: 0.0,
            flood_rate: 0.0,
            seed: None,
            flood_chars: 20_000,
        }
    }
}

impl ChaosConfig {
    pub fn is_enabled(&self) -> bool {
        self.timeout_rate > 0.0 || self.eacces_rate > 0.0 || self.flood_rate > 0.0
    }
}

pub struct ChaosMonkey {
    config: ChaosConfig,
    rng: StdRng,
}

impl ChaosMonkey {
    pub fn new(config: ChaosConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { config, rng }
    }

    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    pub fn roll_timeout(&mut self) -> bool {
        let rate = self.config.timeout_rate;
        self.roll(rate)
    }

    pub fn roll_eacces(&mut self) -> bool {
        let rate = self.config.eacces_rate;
        self.roll(rate)
    }

    pub fn roll_flood(&mut self) -> bool {
        let rate = self.config.flood_rate;
        self.roll(rate)
    }

    /// Deterministic noise block of `flood_chars` characters.
    pub fn flood_noise(&self) -> String {
        const LINE: &str = "[CHAOS_FLOOD] ################################################\n";
        LINE.chars().cycle().take(self.config.flood_chars).collect()
    }

    fn roll(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        self.rng.gen_bool(rate.min(1.0))
    }
}
