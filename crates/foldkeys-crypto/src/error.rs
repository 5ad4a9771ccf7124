use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("random generation failed: {0}")]
    Random(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("unsupported client half encryption version: {0}")]
    UnsupportedVersion(u32),

    #[error("server half id does not match the server half")]
    ServerHalfIdMismatch,

    #[error("invalid encoding: {0}")]
    Encoding(String),
}
