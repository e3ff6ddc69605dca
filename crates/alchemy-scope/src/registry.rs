use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use alchemy_domain::ResourceKind;
use serde_json::Value;

use crate::context::LifecycleContext;
use crate::error::ScopeError;

pub type ProviderFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, String>> + Send>>;

/// A provider: given a lifecycle context and the resource's props, performs
/// the side effect appropriate to `ctx.phase` and returns the resource's
/// output.
pub type ProviderFn = Arc<dyn Fn(LifecycleContext, Value) -> ProviderFuture + Send + Sync>;

#[derive(Clone)]
pub struct RegisteredProvider {
    pub kind: ResourceKind,
    pub func: ProviderFn,
    /// If true, the runner always calls the provider with `Phase::Update`
    /// even when props are unchanged from the prior run (skip-detection is
    /// bypassed for this kind).
    pub always_update: bool,
}

static REGISTRY: std::sync::OnceLock<RwLock<HashMap<String, RegisteredProvider>>> =
    std::sync::OnceLock::new();

fn registry() -> &'static RwLock<HashMap<String, RegisteredProvider>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Registers a provider for `kind`. Idempotent: re-registering the exact
/// same kind with a function pointer already on file is not checked for
/// equality (closures aren't comparable); any second registration for an
/// already-registered kind is rejected as a conflict, matching the
/// single-writer-per-kind invariant.
pub fn register(
    kind: ResourceKind,
    always_update: bool,
    func: ProviderFn,
) -> Result<(), ScopeError> {
    let mut guard = registry().write().expect("resource registry lock poisoned");
    if guard.contains_key(kind.as_str()) {
        return Err(ScopeError::KindConflict {
            kind: kind.as_str().to_string(),
        });
    }
    guard.insert(
        kind.as_str().to_string(),
        RegisteredProvider {
            kind,
            func,
            always_update,
        },
    );
    Ok(())
}

pub fn lookup(kind: &ResourceKind) -> Result<RegisteredProvider, ScopeError> {
    let guard = registry().read().expect("resource registry lock poisoned");
    guard
        .get(kind.as_str())
        .cloned()
        .ok_or_else(|| ScopeError::UnknownKind {
            kind: kind.as_str().to_string(),
        })
}

/// Clears all registered providers. Test-only: production code has no
/// legitimate reason to unregister a kind mid-process.
#[cfg(any(test, feature = "test-util"))]
pub fn reset_for_test() {
    registry()
        .write()
        .expect("resource registry lock poisoned")
        .clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_provider() -> ProviderFn {
        Arc::new(|_ctx, props| Box::pin(async move { Ok(props) }))
    }

    #[test]
    fn register_then_lookup_succeeds() {
        reset_for_test();
        let kind = ResourceKind::new("test::A").unwrap();
        register(kind.clone(), false, noop_provider()).unwrap();
        assert!(lookup(&kind).is_ok());
    }

    #[test]
    fn duplicate_registration_conflicts() {
        reset_for_test();
        let kind = ResourceKind::new("test::B").unwrap();
        register(kind.clone(), false, noop_provider()).unwrap();
        let err = register(kind, false, noop_provider()).unwrap_err();
        assert!(matches!(err, ScopeError::KindConflict { .. }));
    }

    #[test]
    fn unknown_kind_is_an_error() {
        reset_for_test();
        let kind = ResourceKind::new("test::Missing").unwrap();
        assert!(matches!(lookup(&kind), Err(ScopeError::UnknownKind { .. })));
    }
}
