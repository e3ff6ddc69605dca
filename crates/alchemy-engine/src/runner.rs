use std::sync::Arc;
use std::time::Duration;

use alchemy_domain::{Fqn, Phase, ResourceKind, ResourceState, ResourceStatus};
use alchemy_scope::{LifecycleContext, Scope};
use alchemy_secret::DerivedKey;
use alchemy_store::{compute_desired_hash, StateStore};
use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::planner::{PlanAction, PlanEntry};

/// How long a resource invocation will wait for a same-process peer
/// resource (referenced by `ResourceRef` but not yet claimed in any scope)
/// to appear before giving up. Guards against a dangling reference to an
/// id that was never declared this run.
const DEPENDENCY_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const DEPENDENCY_POLL_INTERVAL: Duration = Duration::from_millis(10);

tokio::task_local! {
    static CURRENT_RUNNER: Arc<Runner>;
}

/// An old physical object whose provider-level teardown was deferred to
/// finalization because its resource was replaced (a new object created
/// under the same FQN) rather than updated in place. The `Finalizer` drains
/// these after a run completes, once every consumer of the new output has
/// itself run — see `LifecycleContext::replace`.
#[derive(Debug, Clone)]
pub struct PendingDelete {
    pub fqn: Fqn,
    pub kind: ResourceKind,
    pub id: String,
    pub stage: String,
    pub prev_output: Value,
    pub prev_props: Value,
}

/// Drives resource invocations: registration, dependency resolution, phase
/// selection, provider invocation, and state persistence. One `Runner` is
/// shared across every resource invocation in a single `plan`/`apply`/
/// `destroy` run.
pub struct Runner {
    store: Arc<dyn StateStore>,
    key: Option<DerivedKey>,
    cancel: Option<CancellationToken>,
    dry_run: bool,
    plan_sink: Option<Arc<tokio::sync::Mutex<Vec<PlanEntry>>>>,
    pending_deletes: tokio::sync::Mutex<Vec<PendingDelete>>,
}

impl Runner {
    pub fn new(store: Arc<dyn StateStore>, key: Option<DerivedKey>) -> Self {
        Runner {
            store,
            key,
            cancel: None,
            dry_run: false,
            plan_sink: None,
            pending_deletes: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// In dry-run mode (used by the planner) no provider is ever invoked;
    /// resources resolve to their prior output, or `Value::Null` if none.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Every invocation appends a `PlanEntry` describing the action it
    /// took (or would take, in dry-run mode) to `sink`. Used by the
    /// planner to build a `Plan` without a second traversal of the graph.
    pub fn with_plan_sink(mut self, sink: Arc<tokio::sync::Mutex<Vec<PlanEntry>>>) -> Self {
        self.plan_sink = Some(sink);
        self
    }

    /// Drains every old-object teardown deferred by a replacement this
    /// run. Called once the run's program has finished, before handing the
    /// result to the `Finalizer`.
    pub async fn take_pending_deletes(&self) -> Vec<PendingDelete> {
        std::mem::take(&mut *self.pending_deletes.lock().await)
    }

    async fn record_plan(&self, fqn: &Fqn, kind: &ResourceKind, action: PlanAction) {
        if let Some(sink) = &self.plan_sink {
            sink.lock().await.push(PlanEntry {
                fqn: fqn.clone(),
                kind: kind.clone(),
                action,
            });
        }
    }

    pub async fn invoke(
        &self,
        kind: ResourceKind,
        id: &str,
        props: Value,
    ) -> Result<Value, EngineError> {
        if let Some(c) = &self.cancel {
            if c.is_cancelled() {
                return Err(EngineError::CancellationSkipped);
            }
        }

        let scope = Scope::current()?;
        let (handle, is_first) = scope.claim(id, &kind).await?;
        if !is_first {
            debug!(fqn = %handle.fqn, "observing in-flight handle for duplicate invocation");
            return Ok(handle.resolve().await);
        }

        let fqn = handle.fqn.clone();

        let mut deps = Vec::new();
        let resolved_props = resolve_refs(&scope, &props, &mut deps).await?;

        let existing = self.store.get(&fqn).await?;
        if let Some(existing) = &existing {
            if existing.kind != kind {
                return Err(EngineError::ProviderError {
                    fqn: fqn.clone(),
                    message: format!(
                        "resource recorded under this id with kind '{}', now requested as '{}'",
                        existing.kind, kind
                    ),
                });
            }
        }

        let plain_props = alchemy_serde::codec::to_plain(&resolved_props);
        let encoded_props = alchemy_serde::encode(&resolved_props, self.key.as_ref())?;

        let provider = alchemy_scope::lookup(&kind)?;
        let now = Utc::now();

        let skip = !provider.always_update
            && scope.phase != alchemy_domain::ScopePhase::Destroy
            && scope.phase != alchemy_domain::ScopePhase::Read
            && existing
                .as_ref()
                .map(|e| compute_desired_hash(&e.props) == compute_desired_hash(&encoded_props))
                .unwrap_or(false);

        if skip {
            self.record_plan(&fqn, &kind, PlanAction::Skip).await;
            let mut next = existing.expect("skip only chosen when prior state exists");
            next.seq = scope.next_seq();
            next.updated_at = now;
            self.store.set(&next).await?;
            let decoded_output = alchemy_serde::decode(&next.output, self.key.as_ref())?;
            handle.set(decoded_output.clone()).await;
            info!(%fqn, "skip: props unchanged since last run");
            return Ok(decoded_output);
        }

        let phase = if scope.phase == alchemy_domain::ScopePhase::Destroy {
            Phase::Delete
        } else if scope.phase == alchemy_domain::ScopePhase::Read {
            Phase::Read
        } else if existing.is_none() {
            Phase::Create
        } else {
            Phase::Update
        };

        self.record_plan(
            &fqn,
            &kind,
            match phase {
                Phase::Create => PlanAction::Create,
                Phase::Update => PlanAction::Update,
                Phase::Delete => PlanAction::Delete,
                Phase::Read => PlanAction::Read,
            },
        )
        .await;

        if self.dry_run {
            let placeholder = existing
                .as_ref()
                .map(|e| alchemy_serde::decode(&e.output, self.key.as_ref()))
                .transpose()?
                .unwrap_or(Value::Null);
            handle.set(placeholder.clone()).await;
            return Ok(placeholder);
        }

        let prev_output = existing
            .as_ref()
            .map(|e| alchemy_serde::decode(&e.output, self.key.as_ref()))
            .transpose()?;
        let prev_props = existing
            .as_ref()
            .map(|e| alchemy_serde::decode(&e.props, self.key.as_ref()))
            .transpose()?;

        let ctx = LifecycleContext::new(
            phase,
            prev_output.clone(),
            prev_props.clone(),
            id.to_string(),
            fqn.clone(),
            kind.clone(),
            scope.stage.clone(),
            scope.clone(),
            scope.local,
        );

        info!(%fqn, %phase, "invoking provider");
        let mut output = (provider.func)(ctx.clone(), plain_props.clone())
            .await
            .map_err(|message| EngineError::ProviderError {
                fqn: fqn.clone(),
                message,
            })?;
        let mut final_phase = phase;

        if ctx.is_replace_requested() {
            warn!(
                %fqn,
                "provider requested replacement: creating the new object now, \
                 old object's teardown deferred to finalization"
            );
            let create_ctx = LifecycleContext::new(
                Phase::Create,
                None,
                None,
                id.to_string(),
                fqn.clone(),
                kind.clone(),
                scope.stage.clone(),
                scope.clone(),
                scope.local,
            );
            output = (provider.func)(create_ctx, plain_props.clone())
                .await
                .map_err(|message| EngineError::ProviderError {
                    fqn: fqn.clone(),
                    message,
                })?;
            final_phase = Phase::Create;

            if let Some(old_output) = prev_output.clone() {
                self.pending_deletes.lock().await.push(PendingDelete {
                    fqn: fqn.clone(),
                    kind: kind.clone(),
                    id: id.to_string(),
                    stage: scope.stage.clone(),
                    prev_output: old_output,
                    prev_props: prev_props.clone().unwrap_or(Value::Null),
                });
            }
        }

        if final_phase == Phase::Delete {
            self.store.delete(&fqn).await?;
            handle.set(Value::Null).await;
            return Ok(Value::Null);
        }

        let status = match final_phase {
            Phase::Create => ResourceStatus::Created,
            Phase::Update => ResourceStatus::Updated,
            Phase::Read => existing
                .as_ref()
                .map(|e| e.status)
                .unwrap_or(ResourceStatus::Created),
            Phase::Delete => unreachable!("handled above"),
        };

        let encoded_output = alchemy_serde::encode(&output, self.key.as_ref())?;
        let seq = scope.next_seq();
        let state = ResourceState {
            kind: kind.clone(),
            id: id.to_string(),
            fqn: fqn.clone(),
            status,
            phase: final_phase,
            stage: scope.stage.clone(),
            seq,
            props: encoded_props,
            output: encoded_output,
            deps: deps.into_iter().collect(),
            created_at: existing.as_ref().map(|e| e.created_at).unwrap_or(now),
            updated_at: now,
        };
        self.store.set(&state).await?;
        handle.set(output.clone()).await;
        Ok(output)
    }

    /// Runs `fut` with `self` installed as the ambient runner, so the
    /// facade's `resource()` calls can find it via `Runner::current()`
    /// without threading it through every user function signature.
    pub async fn run<F, T>(self: Arc<Self>, fut: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        CURRENT_RUNNER.scope(self, fut).await
    }

    pub fn current() -> Result<Arc<Runner>, EngineError> {
        CURRENT_RUNNER.try_with(|r| r.clone()).map_err(|_| EngineError::NoRunner)
    }

    /// Invokes the provider's delete phase for a resource that exists in
    /// the store but was not claimed in the current run. Used by the
    /// finalizer's orphan sweep; bypasses `Scope` registration entirely.
    pub async fn delete_orphan(&self, state: &ResourceState) -> Result<(), EngineError> {
        if self.dry_run {
            return Ok(());
        }
        let provider = alchemy_scope::lookup(&state.kind)?;
        let output = alchemy_serde::decode(&state.output, self.key.as_ref())?;
        let props = alchemy_serde::decode(&state.props, self.key.as_ref())?;
        let scope = Scope::root(&state.stage, &state.stage, alchemy_domain::ScopePhase::Destroy, false);
        let ctx = LifecycleContext::new(
            Phase::Delete,
            Some(output),
            Some(props),
            state.id.clone(),
            state.fqn.clone(),
            state.kind.clone(),
            state.stage.clone(),
            scope,
            false,
        );
        (provider.func)(ctx, Value::Null)
            .await
            .map_err(|message| EngineError::ProviderError {
                fqn: state.fqn.clone(),
                message,
            })?;
        self.store.delete(&state.fqn).await?;
        Ok(())
    }

    /// Invokes the provider's delete phase for an old physical object left
    /// behind by a replacement, without touching the `StateStore` — the
    /// resource's state record already holds the *new* object and must not
    /// be disturbed. `prev_output`/`prev_props` on `pd` are already
    /// decoded plaintext, captured at the moment of replacement.
    pub async fn run_pending_delete(&self, pd: &PendingDelete) -> Result<(), EngineError> {
        if self.dry_run {
            return Ok(());
        }
        let provider = alchemy_scope::lookup(&pd.kind)?;
        let scope = Scope::root(&pd.stage, &pd.stage, alchemy_domain::ScopePhase::Destroy, false);
        let ctx = LifecycleContext::new(
            Phase::Delete,
            Some(pd.prev_output.clone()),
            Some(pd.prev_props.clone()),
            pd.id.clone(),
            pd.fqn.clone(),
            pd.kind.clone(),
            pd.stage.clone(),
            scope,
            false,
        );
        (provider.func)(ctx, Value::Null)
            .await
            .map_err(|message| EngineError::ProviderError {
                fqn: pd.fqn.clone(),
                message,
            })?;
        Ok(())
    }
}

/// Walks `value`, replacing every `ResourceRef` tag with the referenced
/// resource's resolved output, awaiting it if necessary. Every referenced
/// fqn is appended to `deps`.
fn resolve_refs<'a>(
    scope: &'a Scope,
    value: &'a Value,
    deps: &'a mut Vec<Fqn>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, EngineError>> + Send + 'a>> {
    Box::pin(async move {
        if let Some(r) = alchemy_serde::ResourceRef::from_tagged_value(value) {
            deps.push(r.fqn.clone());
            let handle = await_handle(scope, &r.fqn).await?;
            return Ok(handle.resolve().await);
        }
        match value {
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), resolve_refs(scope, v, deps).await?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for v in items {
                    out.push(resolve_refs(scope, v, deps).await?);
                }
                Ok(Value::Array(out))
            }
            other => Ok(other.clone()),
        }
    })
}

async fn await_handle(scope: &Scope, fqn: &Fqn) -> Result<Arc<alchemy_scope::ResourceHandle>, EngineError> {
    let deadline = tokio::time::Instant::now() + DEPENDENCY_WAIT_TIMEOUT;
    loop {
        if let Some(h) = scope.lookup_handle(fqn).await {
            return Ok(h);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(EngineError::ProviderError {
                fqn: fqn.clone(),
                message: format!("dependency '{fqn}' was never claimed in this run"),
            });
        }
        tokio::time::sleep(DEPENDENCY_POLL_INTERVAL).await;
    }
}
