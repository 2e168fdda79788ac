//! Common types shared by the coordinator, engine and endpoint.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

/// A SHA3-256 digest of a model's weights.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelDigest(pub [u8; 32]);

impl ModelDigest {
    /// Digest a weight vector (little-endian f32 bytes).
    pub fn of_weights(weights: &[f32]) -> Self {
        let mut hasher = Sha3_256::new();
        for w in weights {
            hasher.update(w.to_le_bytes());
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&hasher.finalize());
        Self(arr)
    }

    /// Create a zero digest.
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Short form for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl std::fmt::Display for ModelDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Default for ModelDigest {
    fn default() -> Self {
        Self::zero()
    }
}

/// Timestamp wrapper for consistent serialization.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Get current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic() {
        let a = ModelDigest::of_weights(&[1.0, 2.0, 3.0]);
        let b = ModelDigest::of_weights(&[1.0, 2.0, 3.0]);
        assert_eq!(a, b);
        assert_ne!(a, ModelDigest::of_weights(&[1.0, 2.0, 3.5]));
    }

    #[test]
    fn test_digest_hex_parse() {
        let digest = ModelDigest::of_weights(&[0.25; 4]);
        let parsed = ModelDigest::from_hex(&digest.to_hex()).unwrap();
        assert_eq!(digest, parsed);
        assert!(ModelDigest::from_hex("abcd").is_err());
    }

    #[test]
    fn test_digest_display() {
        let display = format!("{}", ModelDigest::zero());
        assert_eq!(display.len(), 64);
        assert_eq!(ModelDigest::zero().short().len(), 12);
    }
}
