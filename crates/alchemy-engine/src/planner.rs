use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use alchemy_domain::{Fqn, ResourceKind, ScopePhase};
use alchemy_scope::Scope;
use alchemy_secret::DerivedKey;
use alchemy_store::StateStore;
use tokio::sync::Mutex;

use crate::error::EngineError;
use crate::runner::{PendingDelete, Runner};

/// What a `Runner::invoke` call decided to do with a resource, recorded
/// for display before any provider is actually invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Create,
    Update,
    Delete,
    Read,
    Skip,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PlanEntry {
    pub fqn: Fqn,
    pub kind: ResourceKind,
    pub action: PlanAction,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Plan {
    pub entries: Vec<PlanEntry>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.action == PlanAction::Skip)
    }
}

pub struct Planner {
    store: Arc<dyn StateStore>,
    key: Option<DerivedKey>,
}

impl Planner {
    pub fn new(store: Arc<dyn StateStore>, key: Option<DerivedKey>) -> Self {
        Planner { store, key }
    }

    /// Runs `program` under `ScopePhase::Plan` with a dry-run `Runner`
    /// installed, recording one `PlanEntry` per resource invocation
    /// without ever calling a real provider. Also reports orphans: fqns
    /// present in the store under `root_name` that the program never
    /// touched, which would be deleted by a subsequent finalizer.
    pub async fn plan<F, Fut>(&self, root_name: &str, stage: &str, program: F) -> Result<Plan, EngineError>
    where
        F: FnOnce(Arc<Scope>) -> Fut,
        Fut: Future<Output = Result<(), EngineError>>,
    {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let runner = Arc::new(
            Runner::new(self.store.clone(), self.key.clone())
                .with_dry_run(true)
                .with_plan_sink(sink.clone()),
        );

        let root = Scope::root(root_name, stage, ScopePhase::Plan, false);
        let root_for_program = root.clone();
        let outcome = runner
            .run(Scope::run(root.clone(), async move {
                program(root_for_program).await
            }))
            .await;
        if let Err(err) = outcome {
            root.mark_failed();
            return Err(err);
        }

        let mut entries = sink.lock().await.clone();

        let touched: std::collections::HashSet<Fqn> = entries.iter().map(|e| e.fqn.clone()).collect();
        let stored = self.store.list(&root.chain).await?;
        for state in stored {
            if !touched.contains(&state.fqn) {
                entries.push(PlanEntry {
                    fqn: state.fqn,
                    kind: state.kind,
                    action: PlanAction::Delete,
                });
            }
        }

        Ok(Plan { entries })
    }

    /// Re-runs `program` for real, but only if `review` accepts `plan`.
    /// No provider is invoked when `review` returns `false`.
    pub async fn apply_reviewed<F, Fut, R>(
        &self,
        root_name: &str,
        stage: &str,
        program: F,
        review: R,
    ) -> Result<Option<(Plan, Arc<Scope>, Vec<PendingDelete>)>, EngineError>
    where
        F: FnOnce(Arc<Scope>) -> Fut + Clone,
        Fut: Future<Output = Result<(), EngineError>>,
        R: FnOnce(&Plan) -> bool,
    {
        let plan = self.plan(root_name, stage, program.clone()).await?;
        if !review(&plan) {
            return Ok(None);
        }

        let runner = Arc::new(Runner::new(self.store.clone(), self.key.clone()));
        let root = Scope::root(root_name, stage, ScopePhase::Up, false);
        let root_for_program = root.clone();
        let outcome = runner
            .clone()
            .run(Scope::run(root.clone(), async move { program(root_for_program).await }))
            .await;
        if let Err(err) = outcome {
            root.mark_failed();
            return Err(err);
        }
        let pending_deletes = runner.take_pending_deletes().await;
        Ok(Some((plan, root, pending_deletes)))
    }
}

/// Groups `deps` into the `fqn -> depends_on` map the dependency grapher
/// expects, from a flat list of recorded resource states.
pub fn deps_map(states: &[alchemy_domain::ResourceState]) -> HashMap<Fqn, BTreeSet<Fqn>> {
    states.iter().map(|s| (s.fqn.clone(), s.deps.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_with_only_skips_is_empty() {
        let plan = Plan {
            entries: vec![PlanEntry {
                fqn: Fqn::new("app", "x").unwrap(),
                kind: ResourceKind::new("test::Thing").unwrap(),
                action: PlanAction::Skip,
            }],
        };
        assert!(plan.is_empty());
    }

    #[test]
    fn plan_with_a_create_is_not_empty() {
        let plan = Plan {
            entries: vec![PlanEntry {
                fqn: Fqn::new("app", "x").unwrap(),
                kind: ResourceKind::new("test::Thing").unwrap(),
                action: PlanAction::Create,
            }],
        };
        assert!(!plan.is_empty());
    }
}
