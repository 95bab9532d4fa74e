use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SharedError {
    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("Unsupported language code: {0}")]
    UnknownLanguage(String),

    #[error("Empty peer identity")]
    EmptyIdentity,
}
