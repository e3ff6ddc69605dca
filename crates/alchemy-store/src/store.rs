use async_trait::async_trait;
use alchemy_domain::{Fqn, ResourceState};

use crate::error::StoreError;

/// Pluggable persistence backend for resource state. Every operation is
/// keyed by a resource's fully-qualified name.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    async fn get(&self, fqn: &Fqn) -> Result<Option<ResourceState>, StoreError>;

    async fn set(&self, state: &ResourceState) -> Result<(), StoreError>;

    async fn delete(&self, fqn: &Fqn) -> Result<(), StoreError>;

    /// Every resource whose fqn starts with `scope_chain` (immediate and
    /// nested), in ascending `seq` order.
    async fn list(&self, scope_chain: &str) -> Result<Vec<ResourceState>, StoreError>;

    /// Every resource in the store, in ascending `seq` order. Used by the
    /// finalizer's orphan sweep at the root scope.
    async fn all(&self) -> Result<Vec<ResourceState>, StoreError>;
}
