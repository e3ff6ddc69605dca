use alchemy_domain::Fqn;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("no scope is current on this task; call from inside Scope::run")]
    NoScope,

    #[error("kind '{kind}' is already registered for a different provider")]
    KindConflict { kind: String },

    #[error("no provider registered for kind '{kind}'")]
    UnknownKind { kind: String },

    #[error("resource id '{id}' is already in use in this scope")]
    DuplicateId { id: String },

    #[error("invalid resource id: {0}")]
    InvalidId(#[from] alchemy_domain::DomainError),

    #[error("provider for '{fqn}' failed: {message}")]
    ProviderError { fqn: Fqn, message: String },

    #[error(transparent)]
    Serde(#[from] alchemy_serde::SerdeError),
}
