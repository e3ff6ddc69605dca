pub mod config;
pub mod error;
pub mod testing;

use std::future::Future;
use std::sync::Arc;

use alchemy_domain::{ResourceKind, ScopePhase};
use alchemy_scope::ProviderFuture;
use alchemy_secret::DerivedKey;
use alchemy_store::{FsStore, StateStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;

pub use alchemy_engine::{EngineError, FinalizeReport, Finalizer, Plan, PlanAction, PlanEntry, Planner, Runner};
pub use alchemy_scope::{LifecycleContext, Scope};
pub use config::Config;
pub use error::AlchemyError;

/// The result of a successful `apply`/`apply_reviewed`: the plan that was
/// executed, plus how many untouched orphans and deferred-replacement
/// teardowns the finalizer swept up.
#[derive(Debug, Clone)]
pub struct ApplyReport {
    pub plan: Plan,
    pub orphans_deleted: usize,
    pub replacements_finalized: usize,
}

/// Registers a provider for `kind`. Call once per process before the first
/// `run`/`plan`/`apply`; typically guarded by a `std::sync::Once` in the
/// embedding program's setup so repeated test runs don't double-register.
pub fn register_provider<F, Fut>(kind: &str, always_update: bool, f: F) -> Result<(), AlchemyError>
where
    F: Fn(LifecycleContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, String>> + Send + 'static,
{
    let kind = ResourceKind::new(kind)?;
    alchemy_scope::register(
        kind,
        always_update,
        Arc::new(move |ctx, props| Box::pin(f(ctx, props)) as ProviderFuture),
    )?;
    Ok(())
}

/// Declares one resource under the current scope. Must be called from
/// inside the closure passed to `run`/`plan`/`apply`/`destroy`; panics (via
/// `Runner::current`'s `NoRunner` error, surfaced as a `Result`) otherwise.
pub async fn resource<P, O>(kind: &str, id: &str, props: P) -> Result<O, AlchemyError>
where
    P: Serialize,
    O: DeserializeOwned,
{
    let kind = ResourceKind::new(kind)?;
    let props_value = serde_json::to_value(props)?;
    let runner = Runner::current()?;
    let output = runner.invoke(kind, id, props_value).await?;
    Ok(serde_json::from_value(output)?)
}

fn build_store(config: &Config) -> Arc<dyn StateStore> {
    Arc::new(FsStore::new(config.state_root.clone()))
}

fn derive_key(config: &Config) -> Result<Option<DerivedKey>, AlchemyError> {
    match &config.passphrase {
        Some(passphrase) => {
            let salt = alchemy_secret::load_or_create_salt(&config.state_root)?;
            Ok(Some(DerivedKey::derive(passphrase, &salt)))
        }
        None => Ok(None),
    }
}

fn as_engine_result<T>(result: Result<T, AlchemyError>) -> Result<T, EngineError> {
    result.map_err(|e| EngineError::ProgramFailed(e.to_string()))
}

/// Runs `program` once under a fresh root scope with no planning/review
/// step and no finalizer pass. `plan`/`apply`/`destroy` are all built on
/// top of this primitive; called directly it's most useful for one-off
/// reads (`ScopePhase::Read`) where tearing down untouched resources would
/// be wrong.
///
/// `config.phase_override` (the `PHASE` environment variable) wins over
/// `phase` when set, so an operator can force e.g. a read-only audit pass
/// without touching the embedding program's code.
#[instrument(skip(config, program), fields(root = %root_name, stage = %config.stage))]
pub async fn run<F, Fut, T>(config: &Config, root_name: &str, phase: ScopePhase, program: F) -> Result<T, AlchemyError>
where
    F: FnOnce(Arc<Scope>) -> Fut,
    Fut: Future<Output = T>,
{
    let store = build_store(config);
    let key = derive_key(config)?;
    let runner = Arc::new(Runner::new(store, key));
    let effective_phase = config.phase_override.unwrap_or(phase);
    let root = Scope::root(root_name, &config.stage, effective_phase, false);
    Ok(runner
        .run(Scope::run(root.clone(), async move { program(root).await }))
        .await)
}

/// Runs `program` in dry-run mode and returns the `Plan` it would execute,
/// without invoking a single provider.
#[instrument(skip(config, program), fields(root = %root_name, stage = %config.stage))]
pub async fn plan<F, Fut>(config: &Config, root_name: &str, program: F) -> Result<Plan, AlchemyError>
where
    F: FnOnce(Arc<Scope>) -> Fut,
    Fut: Future<Output = Result<(), AlchemyError>>,
{
    let store = build_store(config);
    let key = derive_key(config)?;
    let planner = Planner::new(store, key);
    let wrapped = |scope: Arc<Scope>| async move { as_engine_result(program(scope).await) };
    Ok(planner.plan(root_name, &config.stage, wrapped).await?)
}

/// Plans, hands the plan to `review`, and only executes it for real if
/// `review` returns `true`. No provider is invoked when it returns `false`.
#[instrument(skip(config, program, review), fields(root = %root_name, stage = %config.stage))]
pub async fn apply_reviewed<F, Fut, R>(
    config: &Config,
    root_name: &str,
    program: F,
    review: R,
) -> Result<ApplyReport, AlchemyError>
where
    F: FnOnce(Arc<Scope>) -> Fut + Clone,
    Fut: Future<Output = Result<(), AlchemyError>>,
    R: FnOnce(&Plan) -> bool,
{
    let store = build_store(config);
    let key = derive_key(config)?;
    let planner = Planner::new(store.clone(), key.clone());
    let wrapped = move |scope: Arc<Scope>| {
        let program = program.clone();
        async move { as_engine_result(program(scope).await) }
    };

    let Some((plan, root, pending_deletes)) =
        planner.apply_reviewed(root_name, &config.stage, wrapped, review).await?
    else {
        return Err(AlchemyError::PlanRejected);
    };

    let finalizer = Finalizer::new(store, key);
    let report = finalizer.finalize(root, pending_deletes).await?;
    Ok(ApplyReport {
        plan,
        orphans_deleted: report.orphans_deleted,
        replacements_finalized: report.replacements_finalized,
    })
}

/// `apply_reviewed` with a review that always approves.
pub async fn apply<F, Fut>(config: &Config, root_name: &str, program: F) -> Result<ApplyReport, AlchemyError>
where
    F: FnOnce(Arc<Scope>) -> Fut + Clone,
    Fut: Future<Output = Result<(), AlchemyError>>,
{
    apply_reviewed(config, root_name, program, |_plan| true).await
}

/// Runs `program` under `ScopePhase::Destroy` (every `resource()` call
/// deletes rather than creates/updates) and then finalizes, sweeping up
/// anything left in the store that `program` didn't explicitly tear down.
#[instrument(skip(config, program), fields(root = %root_name, stage = %config.stage))]
pub async fn destroy<F, Fut>(config: &Config, root_name: &str, program: F) -> Result<FinalizeReport, AlchemyError>
where
    F: FnOnce(Arc<Scope>) -> Fut,
    Fut: Future<Output = Result<(), AlchemyError>>,
{
    let store = build_store(config);
    let key = derive_key(config)?;
    let runner = Arc::new(Runner::new(store.clone(), key.clone()));
    let root = Scope::root(root_name, &config.stage, ScopePhase::Destroy, false);
    let root_for_program = root.clone();
    runner
        .clone()
        .run(Scope::run(root.clone(), async move { program(root_for_program).await }))
        .await?;
    let pending_deletes = runner.take_pending_deletes().await;

    let finalizer = Finalizer::new(store, key);
    Ok(finalizer.finalize(root, pending_deletes).await?)
}

/// Re-encrypts every stored secret under `new_passphrase`, having decrypted
/// it under `old_passphrase`. `scope_chain_prefix` limits the rotation to
/// one scope subtree; `None` rotates the whole store.
pub async fn rotate_password(
    config: &Config,
    old_passphrase: &str,
    new_passphrase: &str,
    scope_chain_prefix: Option<&str>,
) -> Result<usize, AlchemyError> {
    let store = build_store(config);
    let salt = alchemy_secret::load_or_create_salt(&config.state_root)?;
    let old_key = DerivedKey::derive(old_passphrase, &salt);
    let new_key = DerivedKey::derive(new_passphrase, &salt);

    let states = match scope_chain_prefix {
        Some(prefix) => store.list(prefix).await?,
        None => store.all().await?,
    };

    let mut rotated = 0;
    for mut state in states {
        state.props = rotate_value(&state.props, &old_key, &new_key)?;
        state.output = rotate_value(&state.output, &old_key, &new_key)?;
        store.set(&state).await?;
        rotated += 1;
    }
    Ok(rotated)
}

fn rotate_value(value: &Value, old_key: &DerivedKey, new_key: &DerivedKey) -> Result<Value, AlchemyError> {
    match value {
        Value::Object(map) => {
            if map.get("@type").and_then(|v| v.as_str()) == Some("secret") {
                let envelope: alchemy_secret::SecretEnvelope = serde_json::from_value(value.clone())?;
                let rotated = alchemy_secret::rotate(&envelope, old_key, new_key)?;
                return Ok(serde_json::to_value(rotated)?);
            }
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), rotate_value(v, old_key, new_key)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|v| rotate_value(v, old_key, new_key))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        other => Ok(other.clone()),
    }
}
