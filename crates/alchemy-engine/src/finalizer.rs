use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alchemy_domain::Fqn;
use alchemy_scope::Scope;
use alchemy_secret::DerivedKey;
use alchemy_store::StateStore;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::graph::dependency_order;
use crate::planner::deps_map;
use crate::runner::{PendingDelete, Runner};

/// What a `Finalizer::finalize` pass actually did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    /// Resources present in the store but not claimed this run, torn down
    /// by the orphan sweep.
    pub orphans_deleted: usize,
    /// Old physical objects torn down because their resource was replaced
    /// rather than updated in place.
    pub replacements_finalized: usize,
}

/// Sweeps resources that exist in the store under a scope tree but were
/// not claimed during the run just completed, deleting them in reverse
/// dependency order, and drains any replacement teardowns deferred by the
/// run. This is what makes removing a `resource()` call from a program
/// actually tear down the thing it used to create, and what makes a
/// `ctx.replace()` request tear down the old object only after every
/// consumer of the new one has itself run.
pub struct Finalizer {
    store: Arc<dyn StateStore>,
    key: Option<DerivedKey>,
    cancel: Option<CancellationToken>,
}

impl Finalizer {
    pub fn new(store: Arc<dyn StateStore>, key: Option<DerivedKey>) -> Self {
        Finalizer {
            store,
            key,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// `root` must be the same scope tree's root that was just run; its
    /// `declared_ids` (walked recursively) is compared against everything
    /// stored under `root.chain` to find orphans. `pending_deletes` is
    /// whatever the run's `Runner::take_pending_deletes` returned.
    pub async fn finalize(
        &self,
        root: Arc<Scope>,
        pending_deletes: Vec<PendingDelete>,
    ) -> Result<FinalizeReport, EngineError> {
        if root.is_failed() {
            warn!(chain = %root.chain, "skipping finalizer: run failed, refusing to delete orphans from a bad run");
            return Ok(FinalizeReport::default());
        }
        if let Some(c) = &self.cancel {
            if c.is_cancelled() {
                return Err(EngineError::CancellationSkipped);
            }
        }

        let mut runner = Runner::new(self.store.clone(), self.key.clone());
        if let Some(c) = &self.cancel {
            runner = runner.with_cancellation(c.clone());
        }
        let runner = Arc::new(runner);

        let mut replacements_finalized = 0;
        for pd in &pending_deletes {
            if let Some(c) = &self.cancel {
                if c.is_cancelled() {
                    return Err(EngineError::CancellationSkipped);
                }
            }
            runner.run_pending_delete(pd).await?;
            replacements_finalized += 1;
        }

        let stored = self.store.list(&root.chain).await?;
        if stored.is_empty() {
            return Ok(FinalizeReport {
                orphans_deleted: 0,
                replacements_finalized,
            });
        }

        let claimed: HashSet<Fqn> = claimed_fqns(&root).await;
        let orphans: Vec<_> = stored.into_iter().filter(|s| !claimed.contains(&s.fqn)).collect();
        if orphans.is_empty() {
            return Ok(FinalizeReport {
                orphans_deleted: 0,
                replacements_finalized,
            });
        }

        info!(count = orphans.len(), chain = %root.chain, "finalizer deleting orphaned resources");

        let deps = deps_map(&orphans);
        // Fails fast on a cycle; the actual order used below is computed
        // per-level so independent orphans can be deleted concurrently.
        dependency_order(&deps)?;

        let mut dependents: HashMap<Fqn, HashSet<Fqn>> = HashMap::new();
        for (fqn, its_deps) in &deps {
            dependents.entry(fqn.clone()).or_default();
            for dep in its_deps {
                dependents.entry(dep.clone()).or_default().insert(fqn.clone());
            }
        }

        let by_fqn: HashMap<Fqn, alchemy_domain::ResourceState> =
            orphans.into_iter().map(|s| (s.fqn.clone(), s)).collect();

        let mut remaining: HashSet<Fqn> = by_fqn.keys().cloned().collect();
        let mut deleted = 0;

        while !remaining.is_empty() {
            if let Some(c) = &self.cancel {
                if c.is_cancelled() {
                    return Err(EngineError::CancellationSkipped);
                }
            }

            let level: Vec<Fqn> = remaining
                .iter()
                .filter(|fqn| {
                    dependents
                        .get(*fqn)
                        .map(|d| d.is_disjoint(&remaining))
                        .unwrap_or(true)
                })
                .cloned()
                .collect();

            if level.is_empty() {
                // Every remaining orphan has a dependent also remaining: the
                // cycle check above should have caught this already.
                return Err(EngineError::DependencyCycle(remaining.into_iter().collect()));
            }

            let results = join_all(level.iter().map(|fqn| {
                let runner = runner.clone();
                let state = by_fqn.get(fqn).expect("level built from by_fqn keys");
                async move { runner.delete_orphan(state).await }
            }))
            .await;
            for result in results {
                result?;
                deleted += 1;
            }

            for fqn in &level {
                remaining.remove(fqn);
            }
        }

        Ok(FinalizeReport {
            orphans_deleted: deleted,
            replacements_finalized,
        })
    }
}

async fn claimed_fqns(scope: &Arc<Scope>) -> HashSet<Fqn> {
    let mut out = HashSet::new();
    collect_claimed(scope, &mut out).await;
    out
}

fn collect_claimed<'a>(
    scope: &'a Arc<Scope>,
    out: &'a mut HashSet<Fqn>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        for id in scope.declared_ids().await {
            if let Ok(fqn) = Fqn::new(&scope.chain, &id) {
                out.insert(fqn);
            }
        }
        for child in scope.children().await {
            collect_claimed(&child, out).await;
        }
    })
}
