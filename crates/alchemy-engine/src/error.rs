use alchemy_domain::Fqn;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Scope(#[from] alchemy_scope::ScopeError),

    #[error(transparent)]
    Store(#[from] alchemy_store::StoreError),

    #[error(transparent)]
    Serde(#[from] alchemy_serde::SerdeError),

    #[error("dependency cycle detected among resources: {0:?}")]
    DependencyCycle(Vec<Fqn>),

    #[error("provider for '{fqn}' failed: {message}")]
    ProviderError { fqn: Fqn, message: String },

    #[error("run was cancelled before the finalizer could run")]
    CancellationSkipped,

    #[error("no runner installed for the current task; resource() must be called inside Runner::run")]
    NoRunner,

    #[error("program failed: {0}")]
    ProgramFailed(String),
}
