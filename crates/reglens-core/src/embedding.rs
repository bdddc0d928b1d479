//! Deterministic text embedding.
//!
//! The encoder maps text to a fixed-dimension vector using signed feature
//! hashing over word unigrams and bigrams, followed by L2 normalization.
//! The same input always produces the same vector for a fixed model
//! identity, no network access is ever required, and the model identity
//! string fixes the output dimension at construction time.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Default model identity. The trailing component fixes the dimension.
pub const DEFAULT_EMBEDDING_MODEL: &str = "feature-hash-v1/384";

/// Upper bound on accepted dimensions. Prevents misconfigured identities
/// from allocating absurd vectors.
const MAX_DIMENSION: usize = 4096;

/// Errors raised by the encoder.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EmbeddingError {
    /// The model identity is unknown or malformed. Fatal at startup.
    #[error("cannot load embedding model {identity:?}: {reason}")]
    ModelLoad {
        /// The rejected identity string.
        identity: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The input produced no features. Transient; the caller may retry
    /// once with different input.
    #[error("cannot encode text: {reason}")]
    Encode {
        /// Why encoding failed.
        reason: String,
    },
}

/// Feature-hashing text encoder with a fixed output dimension.
#[derive(Debug, Clone)]
pub struct HashingEncoder {
    identity: String,
    dimension: usize,
}

impl HashingEncoder {
    /// Constructs an encoder from a model identity of the form
    /// `feature-hash-v1/<dimension>`.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError::ModelLoad`] for unknown families or
    /// out-of-range dimensions.
    pub fn from_identity(identity: &str) -> Result<Self, EmbeddingError> {
        let (family, dim_raw) =
            identity
                .rsplit_once('/')
                .ok_or_else(|| EmbeddingError::ModelLoad {
                    identity: identity.to_string(),
                    reason: "expected <family>/<dimension>".to_string(),
                })?;
        if family != "feature-hash-v1" {
            return Err(EmbeddingError::ModelLoad {
                identity: identity.to_string(),
                reason: format!("unknown model family {family:?}"),
            });
        }
        let dimension: usize = dim_raw.parse().map_err(|_| EmbeddingError::ModelLoad {
            identity: identity.to_string(),
            reason: format!("invalid dimension {dim_raw:?}"),
        })?;
        if dimension == 0 || dimension > MAX_DIMENSION {
            return Err(EmbeddingError::ModelLoad {
                identity: identity.to_string(),
                reason: format!("dimension must be in 1..={MAX_DIMENSION}"),
            });
        }
        Ok(Self {
            identity: identity.to_string(),
            dimension,
        })
    }

    /// The model identity this encoder was constructed with.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Output vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Encodes one text into an L2-normalized vector.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError::Encode`] when the text contains no
    /// alphanumeric tokens.
    pub fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Err(EmbeddingError::Encode {
                reason: "input has no alphanumeric tokens".to_string(),
            });
        }

        let mut vector = vec![0.0f32; self.dimension];
        for token in &tokens {
            self.accumulate(&mut vector, token);
        }
        for pair in tokens.windows(2) {
            self.accumulate(&mut vector, &format!("{} {}", pair[0], pair[1]));
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    /// Encodes a batch of texts, preserving order.
    ///
    /// # Errors
    ///
    /// Fails on the first text that cannot be encoded.
    pub fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.encode(t)).collect()
    }

    fn accumulate(&self, vector: &mut [f32], feature: &str) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let bucket = u64::from_le_bytes(head) as usize % self.dimension;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}
