//! Splittable, counter-based random keys
//!
//! Samplers never share a mutable generator. Every sampling routine takes an
//! [`RngKey`], splits it, consumes one half and hands the other back to the
//! caller. Keys are plain values: the same key always produces the same draws,
//! and a split is a pure function of the key, so parallel chains can be given
//! independent substreams without coordination.
//!
//! Keys are backed by ChaCha8: one stream is reserved for deriving child keys
//! and another for the draws made from a key.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Stream used by [`RngKey::rng`]
const SAMPLING_STREAM: u64 = 0;

/// Stream used to derive child keys
const DERIVATION_STREAM: u64 = 1;

/// Immutable random key
///
/// # Example
///
/// ```
/// use ssm_inference::common::rng::RngKey;
///
/// let key = RngKey::new(42);
/// let (next, sub) = key.split();
/// assert_ne!(next, sub);
/// assert_eq!(key.split(), (next, sub));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RngKey {
    seed: u64,
}

impl RngKey {
    /// Create a root key from a seed
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Raw seed of this key
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Derive a child key for `data`
    ///
    /// Different `data` values give independent keys; the same `data` always
    /// gives the same key.
    pub fn fold_in(self, data: u64) -> RngKey {
        let mut derivation = ChaCha8Rng::seed_from_u64(self.seed);
        derivation.set_stream(DERIVATION_STREAM);
        // two 32-bit words per derived key
        derivation.set_word_pos(u128::from(data) * 2);
        RngKey {
            seed: derivation.next_u64(),
        }
    }

    /// Split into two independent keys
    ///
    /// By convention the first is carried forward and the second consumed.
    pub fn split(self) -> (RngKey, RngKey) {
        (self.fold_in(0), self.fold_in(1))
    }

    /// Split into `n` independent keys
    pub fn split_n(self, n: usize) -> Vec<RngKey> {
        (0..n as u64).map(|i| self.fold_in(i)).collect()
    }

    /// Generator producing the draws of this key
    ///
    /// Consuming the key into a generator is the only way to draw from it.
    pub fn rng(self) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(SAMPLING_STREAM);
        rng
    }
}

impl From<u64> for RngKey {
    fn from(seed: u64) -> Self {
        RngKey::new(seed)
    }
}
