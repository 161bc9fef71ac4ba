//! Sealing seam for credential secrets. Encryption at rest is an external
//! concern; the shipped sealer produces an opaque serialized blob and a
//! deployment that needs real encryption swaps the implementation behind
//! the trait, keyed from the `security.encryption_key` setting.

use serde::{Deserialize, Serialize};

/// The secret material a credential protects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSecret {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub password: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error("failed to encode secret: {0}")]
    Encode(String),
    #[error("failed to decode secret: {0}")]
    Decode(String),
}

pub trait SecretSealer: Send + Sync {
    fn seal(&self, secret: &CredentialSecret) -> Result<Vec<u8>, SealError>;
    fn open(&self, blob: &[u8]) -> Result<CredentialSecret, SealError>;
}

/// Serializes the secret without transforming it. Deployments that require
/// at-rest encryption replace this with a keyed sealer.
pub struct PlainSealer;

impl SecretSealer for PlainSealer {
    fn seal(&self, secret: &CredentialSecret) -> Result<Vec<u8>, SealError> {
        serde_json::to_vec(secret).map_err(|e| SealError::Encode(e.to_string()))
    }

    fn open(&self, blob: &[u8]) -> Result<CredentialSecret, SealError> {
        serde_json::from_slice(blob).map_err(|e| SealError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let sealer = PlainSealer;
        let secret = CredentialSecret {
            username: "alice".into(),
            password: Some("s3cret".into()),
        };
        let blob = sealer.seal(&secret).unwrap();
        assert_eq!(sealer.open(&blob).unwrap(), secret);
    }

    #[test]
    fn open_rejects_garbage() {
        assert!(PlainSealer.open(b"not json").is_err());
    }
}
