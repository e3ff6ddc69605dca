use std::path::{Path, PathBuf};

use alchemy_domain::{Fqn, ResourceState};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::store::StateStore;

/// Filesystem-backed [`StateStore`]: one JSON file per resource under
/// `{state_root}/{scope-chain}/{id}.json`, with `/` in the scope chain kept
/// as real directories and `:` substituted for any `/` that would otherwise
/// appear inside a single path segment's id.
///
/// Writes take an async mutex, not because the OS needs it, but to
/// serialize this process's own concurrent writers onto one write-temp-file
/// + rename sequence per call, so two resources never race on the same
/// parent directory creation.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

const MAX_RETRIES: u32 = 10;
const INITIAL_BACKOFF_MS: u64 = 100;
const BACKOFF_FACTOR: u64 = 2;
const MAX_BACKOFF_MS: u64 = 10_000;

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsStore {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, fqn: &Fqn) -> PathBuf {
        let encoded = fqn.as_str().replace(':', "_colon_");
        let mut path = self.root.clone();
        for segment in encoded.split('/') {
            path.push(segment);
        }
        path.set_extension("json");
        path
    }

    async fn retrying<F, Fut, T>(op_name: &str, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::io::Result<T>>,
    {
        let mut backoff = INITIAL_BACKOFF_MS;
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt + 1 >= MAX_RETRIES => {
                    return Err(StoreError::Internal(format!(
                        "{op_name} failed after {MAX_RETRIES} attempts: {e}"
                    )));
                }
                Err(e) => {
                    tracing::warn!(attempt, %op_name, error = %e, "state store io failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
                    backoff = (backoff * BACKOFF_FACTOR).min(MAX_BACKOFF_MS);
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl StateStore for FsStore {
    async fn get(&self, fqn: &Fqn) -> Result<Option<ResourceState>, StoreError> {
        let path = self.path_for(fqn);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn set(&self, state: &ResourceState) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(&state.fqn);
        let bytes = serde_json::to_vec_pretty(state)?;
        Self::retrying("set", || {
            let path = path.clone();
            let bytes = bytes.clone();
            async move {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let tmp = path.with_extension("json.tmp");
                tokio::fs::write(&tmp, &bytes).await?;
                tokio::fs::rename(&tmp, &path).await?;
                Ok(())
            }
        })
        .await
    }

    async fn delete(&self, fqn: &Fqn) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(fqn);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn list(&self, scope_chain: &str) -> Result<Vec<ResourceState>, StoreError> {
        let mut out = self.all().await?;
        out.retain(|r| {
            scope_chain.is_empty()
                || r.fqn.as_str() == scope_chain
                || r.fqn.as_str().starts_with(&format!("{scope_chain}/"))
        });
        Ok(out)
    }

    async fn all(&self) -> Result<Vec<ResourceState>, StoreError> {
        let mut out = Vec::new();
        walk_dir(&self.root, &mut out).await?;
        out.sort_by_key(|r| r.seq);
        Ok(out)
    }
}

fn walk_dir<'a>(
    dir: &'a Path,
    out: &'a mut Vec<ResourceState>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), StoreError>> + 'a>> {
    Box::pin(async move {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                walk_dir(&path, out).await?;
            } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let bytes = tokio::fs::read(&path).await?;
                out.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alchemy_domain::{Phase, ResourceKind, ResourceStatus};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn dummy(fqn: &str, seq: u64) -> ResourceState {
        ResourceState {
            kind: ResourceKind::new("test::Thing").unwrap(),
            id: fqn.rsplit('/').next().unwrap().to_string(),
            fqn: Fqn(fqn.to_string()),
            status: ResourceStatus::Created,
            phase: Phase::Create,
            stage: "dev".to_string(),
            seq,
            props: serde_json::json!({}),
            output: serde_json::json!({}),
            deps: BTreeSet::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let state = dummy("app/db", 1);
        store.set(&state).await.unwrap();
        let got = store.get(&Fqn("app/db".into())).await.unwrap().unwrap();
        assert_eq!(got.fqn.as_str(), "app/db");
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FsStore::new(dir.path());
            store.set(&dummy("app/db", 1)).await.unwrap();
        }
        let reopened = FsStore::new(dir.path());
        let got = reopened.get(&Fqn("app/db".into())).await.unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.delete(&Fqn("never/existed".into())).await.unwrap();
    }

    #[tokio::test]
    async fn all_walks_nested_scopes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.set(&dummy("app/db", 2)).await.unwrap();
        store.set(&dummy("app/nested/cache", 1)).await.unwrap();
        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].seq, 1);
    }
}
