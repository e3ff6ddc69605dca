use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Fully-qualified name of a resource: the owning scope's chain joined with
/// `/`, followed by the resource's own id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fqn(pub String);

impl Fqn {
    pub fn new(scope_chain: &str, id: &str) -> Result<Self, DomainError> {
        if id.contains('/') {
            return Err(DomainError::InvalidId(id.to_string()));
        }
        if scope_chain.is_empty() {
            return Ok(Fqn(id.to_string()));
        }
        Ok(Fqn(format!("{scope_chain}/{id}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything before the final path segment.
    pub fn scope_chain(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[..idx],
            None => "",
        }
    }
}

impl std::fmt::Display for Fqn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of a resource, e.g. `"fs::File"`. Opaque to the engine; providers
/// register against a kind string via the resource registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKind(pub String);

impl ResourceKind {
    pub fn new(kind: impl Into<String>) -> Result<Self, DomainError> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(DomainError::EmptyKind);
        }
        Ok(ResourceKind(kind))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Lifecycle enums ────────────────────────────────────────────────────────────

/// The lifecycle phase a provider is invoked under for a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Create,
    Update,
    Delete,
    Read,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Create => "create",
            Phase::Update => "update",
            Phase::Delete => "delete",
            Phase::Read => "read",
        };
        write!(f, "{s}")
    }
}

/// The mode a whole scope tree is being driven under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopePhase {
    Up,
    Destroy,
    Read,
    Plan,
}

/// Status of a resource's last-known lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Creating,
    Created,
    Updating,
    Updated,
    Deleting,
    Deleted,
    Failed,
}

impl ResourceStatus {
    pub fn is_live(&self) -> bool {
        !matches!(self, ResourceStatus::Deleted)
    }
}

// ── Persisted state ────────────────────────────────────────────────────────────

/// The persisted record for one resource, as written to a `StateStore`.
///
/// `deps` is a `BTreeSet` rather than a `HashSet` so serialization is
/// deterministic: two runs that discover the same dependencies in a
/// different order still produce byte-identical JSON, which matters for the
/// on-disk filesystem backend's diffability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    pub kind: ResourceKind,
    pub id: String,
    pub fqn: Fqn,
    pub status: ResourceStatus,
    /// The last phase a provider was actually invoked under for this
    /// resource (`create`/`update`/`delete`/`read`).
    pub phase: Phase,
    pub stage: String,
    pub seq: u64,
    pub props: serde_json::Value,
    pub output: serde_json::Value,
    #[serde(default)]
    pub deps: BTreeSet<Fqn>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, ResourceStatus::Failed)
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.status, ResourceStatus::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fqn_joins_scope_chain_and_id() {
        let f = Fqn::new("app/db", "primary").unwrap();
        assert_eq!(f.as_str(), "app/db/primary");
        assert_eq!(f.scope_chain(), "app/db");
    }

    #[test]
    fn fqn_root_scope_has_no_separator() {
        let f = Fqn::new("", "primary").unwrap();
        assert_eq!(f.as_str(), "primary");
        assert_eq!(f.scope_chain(), "");
    }

    #[test]
    fn fqn_rejects_id_with_separator() {
        let err = Fqn::new("app", "a/b").unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(_)));
    }

    #[test]
    fn resource_kind_rejects_empty() {
        assert!(ResourceKind::new("").is_err());
        assert!(ResourceKind::new("fs::File").is_ok());
    }
}
