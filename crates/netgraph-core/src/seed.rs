//! Deterministic seed derivation.
//!
//! Seeding a process-global RNG creates order dependencies between
//! components; the engine instead derives an independent seed per component
//! from a master seed with SHA-256 and hands each consumer its own RNG.
//! Derivation depends only on the master seed and the component tags, never
//! on the order in which components ask.

use std::fmt::{Display, Write as _};

use rand::rngs::StdRng;
use rand::SeedableRng;
use sha2::{Digest, Sha256};

/// Derives per-component seeds from an optional master seed.
///
/// Without a master seed, derivation returns `None` and [`SeedManager::rng`]
/// hands out entropy-seeded generators (a non-deterministic run).
#[derive(Debug, Clone, Copy, Default, derive_new::new)]
pub struct SeedManager {
    master_seed: Option<u64>,
}

impl SeedManager {
    /// The master seed, if any.
    pub fn master_seed(&self) -> Option<u64> {
        self.master_seed
    }

    /// Derives a seed for the component identified by `components`.
    ///
    /// The derivation hashes `"{master}:{c1}:{c2}:..."` with SHA-256 and
    /// takes the first four digest bytes as a big-endian integer masked to
    /// 31 bits, so identical inputs give identical seeds on any host.
    pub fn derive_seed(&self, components: &[&dyn Display]) -> Option<u64> {
        let master = self.master_seed?;
        let mut input = master.to_string();
        for component in components {
            // Writing to a String cannot fail.
            let _ = write!(input, ":{component}");
        }
        let digest = Sha256::digest(input.as_bytes());
        let word = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        Some(u64::from(word & 0x7FFF_FFFF))
    }

    /// Creates an RNG for the component identified by `components`, seeded
    /// deterministically when a master seed is set.
    pub fn rng(&self, components: &[&dyn Display]) -> StdRng {
        match self.derive_seed(components) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_components_same_seed() {
        let seeds = SeedManager::new(Some(42));
        let a = seeds.derive_seed(&[&"policy_sample", &3]);
        let b = seeds.derive_seed(&[&"policy_sample", &3]);
        assert_eq!(a, b);
        assert!(a.is_some());
    }

    #[test]
    fn different_components_different_seeds() {
        let seeds = SeedManager::new(Some(42));
        let a = seeds.derive_seed(&[&"policy_sample", &3]);
        let b = seeds.derive_seed(&[&"policy_sample", &4]);
        let c = seeds.derive_seed(&[&"worker", &3]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn different_masters_different_seeds() {
        let a = SeedManager::new(Some(1)).derive_seed(&[&"x"]);
        let b = SeedManager::new(Some(2)).derive_seed(&[&"x"]);
        assert_ne!(a, b);
    }

    #[test]
    fn seeds_fit_in_31_bits() {
        let seeds = SeedManager::new(Some(7));
        for i in 0..100 {
            let s = seeds.derive_seed(&[&"component", &i]).unwrap();
            assert!(s < (1 << 31));
        }
    }

    #[test]
    fn unseeded_manager_derives_nothing() {
        let seeds = SeedManager::new(None);
        assert_eq!(seeds.derive_seed(&[&"x"]), None);
    }

    #[test]
    fn derived_rngs_are_reproducible() {
        use rand::Rng;
        let seeds = SeedManager::new(Some(42));
        let mut r1 = seeds.rng(&[&"worker", &0]);
        let mut r2 = seeds.rng(&[&"worker", &0]);
        let a: Vec<u64> = (0..8).map(|_| r1.gen()).collect();
        let b: Vec<u64> = (0..8).map(|_| r2.gen()).collect();
        assert_eq!(a, b);
    }

    // The derivation must stay stable across releases: results recorded with
    // a master seed would silently change otherwise.
    #[test]
    fn derivation_is_pinned() {
        let seeds = SeedManager::new(Some(42));
        let derived = seeds.derive_seed(&[&"policy_sample", &0]).unwrap();
        let expected = {
            let digest = Sha256::digest(b"42:policy_sample:0");
            let word = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
            u64::from(word & 0x7FFF_FFFF)
        };
        assert_eq!(derived, expected);
    }
}
