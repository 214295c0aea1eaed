//! Precision-bounded state hashing for cache keys.
//!
//! States are quantized to a fixed number of decimal places before hashing,
//! so vectors that differ only past that precision collide on purpose. Lower
//! precision raises cache hit rates at the cost of treating slightly different
//! situations as identical.

use std::fmt;

use sha2::{Digest, Sha256};

/// Number of decimal places kept when quantizing a state vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HashPrecision(u8);

impl HashPrecision {
    /// Precision beyond this overflows `i64` for realistic feature ranges.
    pub const MAX: u8 = 9;

    pub fn new(decimals: u8) -> Self {
        Self(decimals.min(Self::MAX))
    }

    pub const fn decimals(self) -> u8 {
        self.0
    }

    fn scale(self) -> f64 {
        10f64.powi(self.0 as i32)
    }
}

impl Default for HashPrecision {
    fn default() -> Self {
        Self(2)
    }
}

/// Hex digest of a quantized state vector.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StateHash(String);

impl StateHash {
    /// Wraps an externally computed digest (e.g. read back from a key).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rounds each element to `precision` decimal places, as scaled integers.
///
/// Non-finite values map to sentinels so they still hash deterministically.
pub fn quantize(state: &[f32], precision: HashPrecision) -> Vec<i64> {
    let scale = precision.scale();
    state
        .iter()
        .map(|&value| {
            if value.is_nan() {
                i64::MIN
            } else if value.is_infinite() {
                if value > 0.0 { i64::MAX } else { i64::MIN + 1 }
            } else {
                ((value as f64) * scale).round() as i64
            }
        })
        .collect()
}

/// Deterministic hash of `state` at `precision`.
///
/// The digest is truncated to 16 bytes (32 hex chars), which keeps cache keys
/// short while leaving collisions to quantization rather than to the hash.
pub fn hash_state(state: &[f32], precision: HashPrecision) -> StateHash {
    let mut hasher = Sha256::new();
    hasher.update((state.len() as u64).to_le_bytes());
    for value in quantize(state, precision) {
        hasher.update(value.to_le_bytes());
    }
    let digest = hasher.finalize();
    StateHash(hex::encode(&digest[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let state = vec![0.25_f32; 64];
        let precision = HashPrecision::default();
        assert_eq!(hash_state(&state, precision), hash_state(&state, precision));
        assert_eq!(hash_state(&state, precision).as_str().len(), 32);
    }

    #[test]
    fn differences_past_precision_collide() {
        let precision = HashPrecision::new(3);
        let a = vec![0.12341_f32, 0.5, -0.75];
        let b = vec![0.12344_f32, 0.50002, -0.75001];
        assert_eq!(hash_state(&a, precision), hash_state(&b, precision));
    }

    #[test]
    fn differences_within_precision_do_not_collide() {
        let precision = HashPrecision::new(2);
        let a = vec![0.10_f32, 0.5];
        let b = vec![0.20_f32, 0.5];
        assert_ne!(hash_state(&a, precision), hash_state(&b, precision));
    }

    #[test]
    fn negative_zero_matches_zero() {
        let precision = HashPrecision::default();
        assert_eq!(
            hash_state(&[-0.0, 1.0], precision),
            hash_state(&[0.0, 1.0], precision)
        );
    }

    #[test]
    fn length_is_part_of_the_hash() {
        let precision = HashPrecision::default();
        assert_ne!(
            hash_state(&[0.0], precision),
            hash_state(&[0.0, 0.0], precision)
        );
    }

    #[test]
    fn precision_is_clamped() {
        assert_eq!(HashPrecision::new(200).decimals(), HashPrecision::MAX);
    }
}
