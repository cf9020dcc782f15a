//! Error types for cryptographic operations

use thiserror::Error;

/// Cryptographic operation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Peer public key is not a valid P-256 point
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Ciphertext could not be decrypted (bad length or key)
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Plaintext could not be encrypted (not block aligned)
    #[error("Encryption failed")]
    EncryptionFailed,

    /// Invalid key length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// PIN/UV auth protocol version not implemented here
    #[error("Unsupported PIN/UV auth protocol {0}")]
    UnsupportedProtocol(u8),
}

/// Result type alias for cryptographic operations
pub type Result<T> = core::result::Result<T, CryptoError>;
