use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlchemyError {
    #[error(transparent)]
    Engine(#[from] alchemy_engine::EngineError),

    #[error(transparent)]
    Store(#[from] alchemy_store::StoreError),

    #[error(transparent)]
    Secret(#[from] alchemy_secret::SecretError),

    #[error(transparent)]
    Serde(#[from] alchemy_serde::SerdeError),

    #[error(transparent)]
    Scope(#[from] alchemy_scope::ScopeError),

    #[error(transparent)]
    Domain(#[from] alchemy_domain::DomainError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("resource props/output not representable as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("plan was rejected by the caller's review")]
    PlanRejected,
}
