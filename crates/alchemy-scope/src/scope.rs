use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use alchemy_domain::{Fqn, ScopePhase};
use indexmap::IndexMap;
use tokio::sync::RwLock;

use crate::error::ScopeError;
use crate::handle::ResourceHandle;

tokio::task_local! {
    static CURRENT_SCOPE: Arc<Scope>;
}

type HandleTable = Arc<RwLock<HashMap<Fqn, Arc<ResourceHandle>>>>;

/// A node in the hierarchical namespace every resource is declared under.
/// `fqn` is this scope's own chain (parent chain + `/` + name), used as the
/// scope-chain prefix for resources declared directly under it.
pub struct Scope {
    pub name: String,
    pub parent: Option<Arc<Scope>>,
    pub chain: String,
    pub stage: String,
    pub phase: ScopePhase,
    pub local: bool,
    pub(crate) resources: RwLock<IndexMap<String, Arc<ResourceHandle>>>,
    children: std::sync::Mutex<Vec<Arc<Scope>>>,
    // Shared by every scope descended from the same root, so a resource in
    // one branch can depend on one declared in a sibling or ancestor
    // branch. Fresh per root, so handles from one run (or one dry-run pass)
    // never leak into the next `apply`/`plan` call in the same process.
    handles: HandleTable,
    seq_counter: AtomicU64,
    finalized: AtomicBool,
    failed: AtomicBool,
}

impl Scope {
    pub fn root(name: impl Into<String>, stage: impl Into<String>, phase: ScopePhase, local: bool) -> Arc<Self> {
        let name = name.into();
        Arc::new(Scope {
            chain: name.clone(),
            name,
            parent: None,
            stage: stage.into(),
            phase,
            local,
            resources: RwLock::new(IndexMap::new()),
            children: std::sync::Mutex::new(Vec::new()),
            handles: Arc::new(RwLock::new(HashMap::new())),
            seq_counter: AtomicU64::new(0),
            finalized: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        })
    }

    pub fn child(self: &Arc<Self>, name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let chain = format!("{}/{}", self.chain, name);
        let child = Arc::new(Scope {
            chain,
            name,
            parent: Some(self.clone()),
            stage: self.stage.clone(),
            phase: self.phase,
            local: self.local,
            resources: RwLock::new(IndexMap::new()),
            children: std::sync::Mutex::new(Vec::new()),
            handles: self.handles.clone(),
            seq_counter: AtomicU64::new(0),
            finalized: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        });
        self.children.lock().expect("children mutex poisoned").push(child.clone());
        child
    }

    /// Looks up a resource's handle anywhere in this run's scope tree by its
    /// fully qualified name. Scoped to the tree rooted at whichever
    /// `Scope::root` this scope descends from, so it never observes a
    /// handle left behind by an earlier or concurrent run.
    pub async fn lookup_handle(&self, fqn: &Fqn) -> Option<Arc<ResourceHandle>> {
        self.handles.read().await.get(fqn).cloned()
    }

    /// Child scopes created via `child()`. Used by the finalizer to walk
    /// a whole scope tree's claimed ids, since a child only knows its
    /// parent by default.
    pub async fn children(&self) -> Vec<Arc<Scope>> {
        self.children.lock().expect("children mutex poisoned").clone()
    }

    /// Runs `fut` with `scope` installed as the task-local current scope.
    /// This is how scope membership survives suspension points: any
    /// `Scope::current()` call inside `fut` (including across `.await`)
    /// observes `scope`.
    pub async fn run<F, T>(scope: Arc<Scope>, fut: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        CURRENT_SCOPE.scope(scope, fut).await
    }

    pub fn current() -> Result<Arc<Scope>, ScopeError> {
        CURRENT_SCOPE.try_with(|s| s.clone()).map_err(|_| ScopeError::NoScope)
    }

    pub fn next_seq(&self) -> u64 {
        self.seq_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    pub fn is_failed(&self) -> bool {
        if self.failed.load(Ordering::SeqCst) {
            return true;
        }
        self.parent.as_ref().map_or(false, |p| p.is_failed())
    }

    pub fn mark_finalized(&self) {
        self.finalized.store(true, Ordering::SeqCst);
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    /// Registers (or returns the existing) handle for `id` in this scope.
    /// Returns `Err(DuplicateId)` only when a different kind is already
    /// registered under the same id; the same kind re-registering returns
    /// the existing handle so a second concurrent call observes it instead
    /// of racing a fresh provider invocation (§5 lock-free claim protocol).
    pub async fn claim(
        self: &Arc<Self>,
        id: &str,
        kind: &alchemy_domain::ResourceKind,
    ) -> Result<(Arc<ResourceHandle>, bool), ScopeError> {
        let mut guard = self.resources.write().await;
        if let Some(existing) = guard.get(id) {
            if &existing.kind != kind {
                return Err(ScopeError::DuplicateId { id: id.to_string() });
            }
            return Ok((existing.clone(), false));
        }
        let fqn = alchemy_domain::Fqn::new(&self.chain, id)?;
        let handle = Arc::new(ResourceHandle::new(fqn.clone(), kind.clone()));
        guard.insert(id.to_string(), handle.clone());
        drop(guard);
        self.handles.write().await.insert(fqn, handle.clone());
        Ok((handle, true))
    }

    pub async fn declared_ids(&self) -> Vec<String> {
        self.resources.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alchemy_domain::ResourceKind;

    #[tokio::test]
    async fn current_fails_outside_run() {
        assert!(matches!(Scope::current(), Err(ScopeError::NoScope)));
    }

    #[tokio::test]
    async fn current_resolves_inside_run() {
        let root = Scope::root("app", "dev", ScopePhase::Up, false);
        let seen = Scope::run(root.clone(), async {
            Scope::current().unwrap().chain.clone()
        })
        .await;
        assert_eq!(seen, "app");
    }

    #[tokio::test]
    async fn current_survives_await_point() {
        let root = Scope::root("app", "dev", ScopePhase::Up, false);
        let seen = Scope::run(root.clone(), async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            Scope::current().unwrap().chain.clone()
        })
        .await;
        assert_eq!(seen, "app");
    }

    #[tokio::test]
    async fn child_chain_nests_under_parent() {
        let root = Scope::root("app", "dev", ScopePhase::Up, false);
        let child = root.child("db");
        assert_eq!(child.chain, "app/db");
    }

    #[tokio::test]
    async fn claim_same_id_twice_returns_same_handle() {
        let root = Scope::root("app", "dev", ScopePhase::Up, false);
        let kind = ResourceKind::new("test::Thing").unwrap();
        let (h1, first1) = root.claim("x", &kind).await.unwrap();
        let (h2, first2) = root.claim("x", &kind).await.unwrap();
        assert!(first1);
        assert!(!first2);
        assert!(Arc::ptr_eq(&h1, &h2));
    }

    #[tokio::test]
    async fn claim_same_id_different_kind_conflicts() {
        let root = Scope::root("app", "dev", ScopePhase::Up, false);
        let a = ResourceKind::new("test::A").unwrap();
        let b = ResourceKind::new("test::B").unwrap();
        root.claim("x", &a).await.unwrap();
        let err = root.claim("x", &b).await.unwrap_err();
        assert!(matches!(err, ScopeError::DuplicateId { .. }));
    }

    #[tokio::test]
    async fn is_failed_propagates_from_parent() {
        let root = Scope::root("app", "dev", ScopePhase::Up, false);
        let child = root.child("db");
        assert!(!child.is_failed());
        root.mark_failed();
        assert!(child.is_failed());
    }
}
