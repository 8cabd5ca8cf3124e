//! In-memory reference implementation of the document store.
//!
//! Compare-and-swap is optimistic, as in hosted document databases: the
//! update function runs against a versioned snapshot without holding the
//! lock, and the commit only lands if no other writer bumped the version in
//! between. Fault injection lets tests force store errors on chosen paths.

use super::{CasDecision, CasOutcome, CasUpdate, DocumentStore, StoreError, StoreResult};
use crate::paths::DocPath;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Hosted stores give up after this many conflicting attempts.
pub const DEFAULT_CAS_MAX_ATTEMPTS: u32 = 25;

/// Operation a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFault {
    Read,
    Write,
    Append,
    CompareAndSwap,
}

impl StoreFault {
    fn name(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Append => "append",
            Self::CompareAndSwap => "compare-and-swap",
        }
    }
}

#[derive(Debug, Clone)]
struct FaultRule {
    path_prefix: String,
    fault: StoreFault,
    /// Matching operations let through before the fault starts firing.
    skip: u32,
    /// `None` fires forever.
    remaining: Option<u32>,
}

#[derive(Debug, Clone)]
struct VersionedDoc {
    value: Value,
    version: u64,
}

/// In-memory document store.
pub struct InMemoryDocumentStore {
    docs: RwLock<HashMap<String, VersionedDoc>>,
    faults: RwLock<Vec<FaultRule>>,
    max_attempts: u32,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::with_max_attempts(DEFAULT_CAS_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            faults: RwLock::new(Vec::new()),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Fail every `fault` operation on paths starting with `path_prefix`.
    pub fn inject_fault(&self, path_prefix: impl Into<String>, fault: StoreFault) {
        self.push_fault(path_prefix.into(), fault, 0, None);
    }

    /// Fail the next `times` matching operations, then behave normally.
    pub fn inject_fault_times(&self, path_prefix: impl Into<String>, fault: StoreFault, times: u32) {
        self.push_fault(path_prefix.into(), fault, 0, Some(times));
    }

    /// Let `skip` matching operations succeed, then fail every later one.
    pub fn inject_fault_after(&self, path_prefix: impl Into<String>, fault: StoreFault, skip: u32) {
        self.push_fault(path_prefix.into(), fault, skip, None);
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.write() {
            faults.clear();
        }
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs.read().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored paths under `prefix`, sorted.
    pub fn paths_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .docs
            .read()
            .map(|docs| {
                docs.keys()
                    .filter(|path| path.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        paths.sort();
        paths
    }

    fn push_fault(&self, path_prefix: String, fault: StoreFault, skip: u32, remaining: Option<u32>) {
        if let Ok(mut faults) = self.faults.write() {
            faults.push(FaultRule {
                path_prefix,
                fault,
                skip,
                remaining,
            });
        }
    }

    fn check_fault(&self, path: &DocPath, op: StoreFault) -> StoreResult<()> {
        let mut faults = self
            .faults
            .write()
            .map_err(|_| StoreError::Backend("fault lock poisoned".to_string()))?;

        let hit = faults.iter_mut().position(|rule| {
            rule.fault == op
                && path.as_str().starts_with(&rule.path_prefix)
                && rule.remaining != Some(0)
        });

        let Some(idx) = hit else {
            return Ok(());
        };
        if faults[idx].skip > 0 {
            faults[idx].skip -= 1;
            return Ok(());
        }
        if let Some(remaining) = faults[idx].remaining.as_mut() {
            *remaining -= 1;
        }
        faults.retain(|rule| rule.remaining != Some(0));

        Err(StoreError::Backend(format!(
            "injected {} fault at '{}'",
            op.name(),
            path
        )))
    }

    fn snapshot(&self, path: &DocPath) -> StoreResult<Option<VersionedDoc>> {
        let docs = self
            .docs
            .read()
            .map_err(|_| StoreError::Backend("document lock poisoned".to_string()))?;
        Ok(docs.get(path.as_str()).cloned())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn backend_label(&self) -> &'static str {
        "memory"
    }

    async fn read(&self, path: &DocPath) -> StoreResult<Option<Value>> {
        self.check_fault(path, StoreFault::Read)?;
        Ok(self.snapshot(path)?.map(|doc| doc.value))
    }

    async fn write(&self, path: &DocPath, partial: Value) -> StoreResult<()> {
        self.check_fault(path, StoreFault::Write)?;
        let mut docs = self
            .docs
            .write()
            .map_err(|_| StoreError::Backend("document lock poisoned".to_string()))?;

        match docs.get_mut(path.as_str()) {
            Some(existing) => {
                merge_shallow(&mut existing.value, partial);
                existing.version += 1;
            }
            None => {
                docs.insert(
                    path.as_str().to_string(),
                    VersionedDoc {
                        value: partial,
                        version: 1,
                    },
                );
            }
        }
        Ok(())
    }

    async fn append_child(&self, parent: &DocPath, value: Value) -> StoreResult<String> {
        self.check_fault(parent, StoreFault::Append)?;
        let id = Uuid::new_v4().to_string();
        let path = parent.child(&id);

        let mut docs = self
            .docs
            .write()
            .map_err(|_| StoreError::Backend("document lock poisoned".to_string()))?;
        docs.insert(
            path.as_str().to_string(),
            VersionedDoc { value, version: 1 },
        );
        Ok(id)
    }

    async fn compare_and_swap(
        &self,
        path: &DocPath,
        update: &mut CasUpdate<'_>,
    ) -> StoreResult<CasOutcome> {
        for attempt in 1..=self.max_attempts {
            self.check_fault(path, StoreFault::CompareAndSwap)?;

            let snapshot = self.snapshot(path)?;
            let seen_version = snapshot.as_ref().map(|doc| doc.version);
            let seen_value = snapshot.map(|doc| doc.value);

            let next = match update(seen_value.as_ref()) {
                CasDecision::Abort => return Ok(CasOutcome::aborted(seen_value)),
                CasDecision::Commit(next) => next,
            };

            let mut docs = self
                .docs
                .write()
                .map_err(|_| StoreError::Backend("document lock poisoned".to_string()))?;
            let current_version = docs.get(path.as_str()).map(|doc| doc.version);
            if current_version != seen_version {
                debug!(path = %path, attempt, "compare-and-swap conflict, retrying");
                continue;
            }

            docs.insert(
                path.as_str().to_string(),
                VersionedDoc {
                    value: next.clone(),
                    version: seen_version.map_or(1, |v| v + 1),
                },
            );
            return Ok(CasOutcome::committed(next));
        }

        debug!(path = %path, attempts = self.max_attempts, "compare-and-swap gave up");
        Ok(CasOutcome::aborted(None))
    }
}

fn merge_shallow(target: &mut Value, partial: Value) {
    match (target, partial) {
        (Value::Object(existing), Value::Object(fields)) => {
            for (key, value) in fields {
                existing.insert(key, value);
            }
        }
        (target, partial) => *target = partial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn write_merges_top_level_fields() {
        let store = InMemoryDocumentStore::new();
        let path = DocPath::new("users/u1");

        store.write(&path, json!({ "a": 1, "b": 2 })).await.unwrap();
        store.write(&path, json!({ "b": 3, "c": 4 })).await.unwrap();

        let value = store.read(&path).await.unwrap().unwrap();
        assert_eq!(value, json!({ "a": 1, "b": 3, "c": 4 }));
    }

    #[tokio::test]
    async fn append_child_generates_unique_ids() {
        let store = InMemoryDocumentStore::new();
        let parent = DocPath::transactions("u1");

        let first = store.append_child(&parent, json!({ "n": 1 })).await.unwrap();
        let second = store.append_child(&parent, json!({ "n": 2 })).await.unwrap();

        assert_ne!(first, second);
        let stored = store.read(&parent.child(&second)).await.unwrap().unwrap();
        assert_eq!(stored["n"], 2);
    }

    #[tokio::test]
    async fn cas_reinvokes_update_after_conflicting_write() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let path = DocPath::new("counters/c1");
        store.write(&path, json!({ "n": 1 })).await.unwrap();

        let mut calls = 0;
        let interloper = store.clone();
        let interloper_path = path.clone();
        let outcome = store
            .compare_and_swap(&path, &mut |current: Option<&Value>| {
                calls += 1;
                let n = current.and_then(|v| v["n"].as_i64()).unwrap_or(0);
                if calls == 1 {
                    // Simulate a concurrent writer landing between read and commit.
                    let mut docs = interloper.docs.write().unwrap();
                    let doc = docs.get_mut(interloper_path.as_str()).unwrap();
                    doc.value = json!({ "n": 10 });
                    doc.version += 1;
                }
                CasDecision::Commit(json!({ "n": n + 1 }))
            })
            .await
            .unwrap();

        assert!(outcome.committed);
        assert_eq!(calls, 2);
        assert_eq!(store.read(&path).await.unwrap().unwrap()["n"], 11);
    }

    #[tokio::test]
    async fn cas_abort_leaves_document_untouched() {
        let store = InMemoryDocumentStore::new();
        let path = DocPath::new("counters/c2");
        store.write(&path, json!({ "n": 5 })).await.unwrap();

        let outcome = store
            .compare_and_swap(&path, &mut |_: Option<&Value>| CasDecision::Abort)
            .await
            .unwrap();

        assert!(!outcome.committed);
        assert_eq!(outcome.value, Some(json!({ "n": 5 })));
    }

    #[tokio::test]
    async fn injected_faults_fire_then_expire() {
        let store = InMemoryDocumentStore::new();
        let path = DocPath::wallet("u1");
        store.inject_fault_times("wallets/", StoreFault::CompareAndSwap, 1);

        let first = store
            .compare_and_swap(&path, &mut |_: Option<&Value>| {
                CasDecision::Commit(json!({}))
            })
            .await;
        assert!(matches!(first, Err(StoreError::Backend(_))));

        let second = store
            .compare_and_swap(&path, &mut |_: Option<&Value>| {
                CasDecision::Commit(json!({}))
            })
            .await
            .unwrap();
        assert!(second.committed);
    }

    #[tokio::test]
    async fn faults_only_match_their_prefix_and_operation() {
        let store = InMemoryDocumentStore::new();
        store.inject_fault("campaigns/", StoreFault::Write);

        assert!(store
            .write(&DocPath::wallet("u1"), json!({}))
            .await
            .is_ok());
        assert!(store
            .read(&DocPath::campaign("c1"))
            .await
            .is_ok());
        assert!(store
            .write(&DocPath::campaign("c1"), json!({}))
            .await
            .is_err());

        store.clear_faults();
        assert!(store
            .write(&DocPath::campaign("c1"), json!({}))
            .await
            .is_ok());
    }
}
