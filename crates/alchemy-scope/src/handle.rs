use alchemy_domain::{Fqn, ResourceKind};
use serde_json::Value;
use tokio::sync::{Notify, RwLock};

/// A resource's output, possibly still being computed by another task.
///
/// A second invocation for the same FQN observes this handle instead of
/// racing to invoke the provider again; it awaits [`resolve`](Self::resolve)
/// until the first invocation's `set` call completes. This is the
/// lock-free same-FQN claim protocol: the handle itself is the
/// serialization point, no separate mutex is needed.
#[derive(Debug)]
pub struct ResourceHandle {
    pub fqn: Fqn,
    pub kind: ResourceKind,
    value: RwLock<Option<Value>>,
    ready: Notify,
}

impl ResourceHandle {
    pub fn new(fqn: Fqn, kind: ResourceKind) -> Self {
        ResourceHandle {
            fqn,
            kind,
            value: RwLock::new(None),
            ready: Notify::new(),
        }
    }

    pub fn resolved(fqn: Fqn, kind: ResourceKind, output: Value) -> Self {
        ResourceHandle {
            fqn,
            kind,
            value: RwLock::new(Some(output)),
            ready: Notify::new(),
        }
    }

    /// Awaits this handle's output, returning immediately if already set.
    pub async fn resolve(&self) -> Value {
        loop {
            let notified = self.ready.notified();
            if let Some(v) = self.value.read().await.clone() {
                return v;
            }
            notified.await;
        }
    }

    pub async fn try_peek(&self) -> Option<Value> {
        self.value.read().await.clone()
    }

    /// Resolves this handle, waking every waiter.
    pub async fn set(&self, value: Value) {
        let mut guard = self.value.write().await;
        *guard = Some(value);
        drop(guard);
        self.ready.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn resolve_returns_immediately_once_set() {
        let h = ResourceHandle::new(Fqn("a".into()), ResourceKind::new("k").unwrap());
        h.set(serde_json::json!({"x": 1})).await;
        assert_eq!(h.resolve().await, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn second_waiter_observes_late_set() {
        let h = Arc::new(ResourceHandle::new(
            Fqn("a".into()),
            ResourceKind::new("k").unwrap(),
        ));
        let h2 = h.clone();
        let waiter = tokio::spawn(async move { h2.resolve().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.set(serde_json::json!("done")).await;
        let got = waiter.await.unwrap();
        assert_eq!(got, serde_json::json!("done"));
    }
}
