use serde::{Deserialize, Serialize};

use crate::constants::{FINGERPRINT_HEX_LEN, KDF_CONTEXT_FINGERPRINT};
use crate::error::SharedError;

/// Short, human-comparable digest of a peer's public key.
///
/// Stored and compared as lowercase hex. Two fingerprints are equal only if
/// their text is byte-for-byte equal after normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint of a 32-byte public key.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let digest = blake3::derive_key(KDF_CONTEXT_FINGERPRINT, public_key);
        let mut text = hex::encode(digest);
        text.truncate(FINGERPRINT_HEX_LEN);
        Self(text)
    }

    /// Validate fingerprint text received from the backend or from storage.
    pub fn parse(s: &str) -> Result<Self, SharedError> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SharedError::InvalidFingerprint(s.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
