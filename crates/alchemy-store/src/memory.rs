use std::collections::HashMap;
use std::sync::Arc;

use alchemy_domain::{Fqn, ResourceState};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::StateStore;

#[derive(Debug, Default)]
struct Inner {
    resources: HashMap<Fqn, ResourceState>,
}

/// In-memory implementation of [`StateStore`]. All data is lost on process
/// exit; used in tests and for the `local` stage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn get(&self, fqn: &Fqn) -> Result<Option<ResourceState>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.resources.get(fqn).cloned())
    }

    async fn set(&self, state: &ResourceState) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.resources.insert(state.fqn.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, fqn: &Fqn) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.resources.remove(fqn);
        Ok(())
    }

    async fn list(&self, scope_chain: &str) -> Result<Vec<ResourceState>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<ResourceState> = guard
            .resources
            .values()
            .filter(|r| {
                scope_chain.is_empty()
                    || r.fqn.as_str() == scope_chain
                    || r.fqn.as_str().starts_with(&format!("{scope_chain}/"))
            })
            .cloned()
            .collect();
        out.sort_by_key(|r| r.seq);
        Ok(out)
    }

    async fn all(&self) -> Result<Vec<ResourceState>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<ResourceState> = guard.resources.values().cloned().collect();
        out.sort_by_key(|r| r.seq);
        Ok(out)
    }
}
