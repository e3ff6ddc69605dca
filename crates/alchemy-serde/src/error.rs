use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerdeError {
    #[error("value contains an unresolved resource reference at '{fqn}'; await its handle before serializing")]
    UnresolvedReference { fqn: String },

    #[error("value is not representable in engine state: {0}")]
    NotRepresentable(String),

    #[error(transparent)]
    Secret(#[from] alchemy_secret::SecretError),

    #[error("malformed tagged value: {0}")]
    Malformed(String),
}
