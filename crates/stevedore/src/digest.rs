//! Content-address digests.
//!
//! Every blob and manifest is stored and retrieved by the digest of its
//! content, in the canonical `algorithm:hex` form. This provides:
//! - Deduplication: Same content = same digest = stored once
//! - Verification: Download and verify the digest matches
//! - Immutability: Content at a digest never changes

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing or validating a digest string.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DigestError {
    /// Missing `algorithm:hex` separator.
    #[error("invalid digest format: {0:?}")]
    InvalidFormat(String),

    /// Algorithm not in the supported set.
    #[error("unsupported digest algorithm: {0:?}")]
    UnsupportedAlgorithm(String),

    /// Hex part has the wrong length for the algorithm.
    #[error("invalid digest length: expected {expected} hex characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Hex part contains non-hexadecimal characters.
    #[error("invalid digest hex: {0:?}")]
    InvalidHex(String),
}

/// Digest algorithms the metadata store records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// Length of the hex encoding of a digest under this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha512 => 128,
        }
    }
}

impl FromStr for Algorithm {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, DigestError> {
        match s {
            "sha256" => Ok(Algorithm::Sha256),
            "sha512" => Ok(Algorithm::Sha512),
            other => Err(DigestError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated content-address digest in `algorithm:hex` form.
///
/// # Example
/// ```
/// use stevedore::Digest;
///
/// let d: Digest = "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
///     .parse()
///     .unwrap();
/// assert_eq!(d.algorithm().as_str(), "sha256");
/// assert_eq!(d.hex().len(), 64);
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    /// Compute the sha256 digest of raw bytes.
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Digest {
            algorithm: Algorithm::Sha256,
            hex: hex::encode(hasher.finalize()),
        }
    }

    /// Compute the sha512 digest of raw bytes.
    pub fn sha512(data: &[u8]) -> Self {
        let mut hasher = Sha512::new();
        hasher.update(data);
        Digest {
            algorithm: Algorithm::Sha512,
            hex: hex::encode(hasher.finalize()),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Hex-encoded hash without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Verify that data hashes to this digest.
    pub fn verify(&self, data: &[u8]) -> bool {
        let computed = match self.algorithm {
            Algorithm::Sha256 => Digest::sha256(data),
            Algorithm::Sha512 => Digest::sha512(data),
        };
        computed == *self
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, DigestError> {
        let (alg, hex_part) = s
            .split_once(':')
            .ok_or_else(|| DigestError::InvalidFormat(s.to_string()))?;
        let algorithm: Algorithm = alg.parse()?;
        if hex_part.len() != algorithm.hex_len() {
            return Err(DigestError::InvalidLength {
                expected: algorithm.hex_len(),
                actual: hex_part.len(),
            });
        }
        if !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DigestError::InvalidHex(hex_part.to_string()));
        }
        Ok(Digest {
            algorithm,
            hex: hex_part.to_ascii_lowercase(),
        })
    }
}

impl TryFrom<String> for Digest {
    type Error = DigestError;

    fn try_from(s: String) -> Result<Self, DigestError> {
        s.parse()
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> String {
        d.to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}
