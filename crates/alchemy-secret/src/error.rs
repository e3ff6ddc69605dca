use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("passphrase required to encrypt or decrypt a secret, but none was provided")]
    KeyMissing,

    #[error("failed to decrypt secret: wrong passphrase or corrupted ciphertext")]
    DecryptFailed,

    #[error("malformed secret envelope: {0}")]
    MalformedEnvelope(String),

    #[error("salt file io error: {0}")]
    SaltIo(#[from] std::io::Error),

    #[error("unsupported secret algorithm: {0}")]
    UnsupportedAlg(String),
}
