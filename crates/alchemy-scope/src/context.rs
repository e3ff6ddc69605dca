use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alchemy_domain::{Fqn, Phase, ResourceKind};
use serde_json::Value;

use crate::scope::Scope;

/// Sentinel returned by [`LifecycleContext::destroy`]. A provider's return
/// type for the delete phase should be this, not a fallible `Result`-wrapped
/// unit, so calling `destroy()` outside `phase == Delete` is caught by the
/// runner rather than silently accepted.
#[derive(Debug, Clone, Copy)]
pub struct Destroyed;

/// Everything a provider needs to decide what to do for one resource
/// invocation. Handed to the provider by value for the duration of a single
/// call; not meant to be stored past the call or moved into an unrelated
/// task.
#[derive(Clone)]
pub struct LifecycleContext {
    pub phase: Phase,
    pub prev_output: Option<Value>,
    pub prev_props: Option<Value>,
    pub id: String,
    pub fqn: Fqn,
    pub kind: ResourceKind,
    pub stage: String,
    pub scope: Arc<Scope>,
    pub is_local: bool,
    replace_requested: Arc<AtomicBool>,
    adopt_requested: Arc<AtomicBool>,
}

impl LifecycleContext {
    pub fn new(
        phase: Phase,
        prev_output: Option<Value>,
        prev_props: Option<Value>,
        id: String,
        fqn: Fqn,
        kind: ResourceKind,
        stage: String,
        scope: Arc<Scope>,
        is_local: bool,
    ) -> Self {
        LifecycleContext {
            phase,
            prev_output,
            prev_props,
            id,
            fqn,
            kind,
            stage,
            scope,
            is_local,
            replace_requested: Arc::new(AtomicBool::new(false)),
            adopt_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signals that this resource must be destroyed and recreated rather
    /// than updated in place. The runner checks this flag after the
    /// provider returns and queues the old instance for deferred deletion.
    pub fn replace(&self) {
        self.replace_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_replace_requested(&self) -> bool {
        self.replace_requested.load(Ordering::SeqCst)
    }

    /// Marks this `create` invocation as adopting a pre-existing external
    /// object rather than provisioning a new one.
    pub fn adopt(&self) {
        self.adopt_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_adoption(&self) -> bool {
        self.adopt_requested.load(Ordering::SeqCst)
    }

    /// Returns the destroy sentinel. Only meaningful when `phase == Delete`;
    /// the runner treats a call to `destroy()` outside that phase as a
    /// provider contract violation.
    pub fn destroy(&self) -> Destroyed {
        Destroyed
    }
}
