use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("resource id '{0}' must not contain the scope separator '/'")]
    InvalidId(String),

    #[error("resource kind must not be empty")]
    EmptyKind,

    #[error("invalid fully-qualified name: {0}")]
    InvalidFqn(String),
}
