// src/hash.rs

//! Content hashing for concrete spec identity
//!
//! Every concrete spec is identified by a SHA-256 hash over its canonical
//! description (see `spec::ConcreteSpec::dag_hash_input`). Two specs with the
//! same hash are interchangeable and are deduplicated to a single DAG node.

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Length of a hash value in hex characters
pub const HASH_HEX_LEN: usize = 64;

/// Hash parsing/validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Hash string has wrong length
    InvalidLength { expected: usize, got: usize },
    /// Hash string contains invalid hex characters
    InvalidHex(String),
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength { expected, got } => {
                write!(f, "invalid hash length: expected {}, got {}", expected, got)
            }
            Self::InvalidHex(s) => write!(f, "invalid hex in hash: {}", s),
        }
    }
}

impl std::error::Error for HashError {}

/// A SHA-256 hash value, stored as a lowercase hex string
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash {
    value: String,
}

impl Hash {
    /// Create a validated hash from a hex string
    pub fn new(value: impl Into<String>) -> Result<Self, HashError> {
        let value = value.into();

        if value.len() != HASH_HEX_LEN {
            return Err(HashError::InvalidLength {
                expected: HASH_HEX_LEN,
                got: value.len(),
            });
        }

        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(value));
        }

        Ok(Self {
            value: value.to_lowercase(),
        })
    }

    fn new_unchecked(value: String) -> Self {
        Self { value }
    }

    /// The hash value as a hex string
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Abbreviated form used when displaying specs (`zlib/1a2b3c4d`)
    pub fn short(&self) -> &str {
        &self.value[..8]
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl FromStr for Hash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl serde::Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de> serde::Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::new(s).map_err(serde::de::Error::custom)
    }
}

/// Incremental hasher over canonical spec fields
pub struct Hasher {
    state: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            state: Sha256::new(),
        }
    }

    /// Feed raw bytes
    pub fn update(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    /// Feed a length-prefixed field, so adjacent fields can never collide
    pub fn field(&mut self, data: &str) {
        self.state.update((data.len() as u64).to_le_bytes());
        self.state.update(data.as_bytes());
    }

    pub fn finalize(self) -> Hash {
        Hash::new_unchecked(hex::encode(self.state.finalize()))
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the hash of a byte slice
pub fn hash_bytes(data: &[u8]) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
