//! In-memory store used by tests and local experiments.

use crate::store::{AtomicStore, Mutation, RecordKind, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// `Mutex<HashMap>`-backed [`AtomicStore`].
///
/// The whole map is one critical section, so every read-modify-write is
/// trivially atomic and no retry loop is needed.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<(RecordKind, String), Value>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a document in place without going through `read_modify_write`.
    /// Test setup helper.
    pub fn seed(&self, kind: RecordKind, key: &str, doc: Value) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.insert((kind, key.to_string()), doc);
        }
    }

    /// Synchronous point read. Test assertion helper.
    #[must_use]
    pub fn get(&self, kind: RecordKind, key: &str) -> Option<Value> {
        self.inner
            .lock()
            .ok()
            .and_then(|guard| guard.get(&(kind, key.to_string())).cloned())
    }

    /// All documents of one kind, for tests that do not know the keys.
    #[must_use]
    pub fn dump(&self, kind: RecordKind) -> Vec<(String, Value)> {
        self.inner.lock().map_or_else(
            |_| Vec::new(),
            |guard| {
                guard
                    .iter()
                    .filter(|((entry_kind, _), _)| *entry_kind == kind)
                    .map(|((_, key), doc)| (key.clone(), doc.clone()))
                    .collect()
            },
        )
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(RecordKind, String), Value>>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".to_string()))
    }
}

#[async_trait]
impl AtomicStore for MemoryStore {
    async fn read_modify_write<T, F>(
        &self,
        kind: RecordKind,
        key: &str,
        apply: F,
    ) -> Result<T, StoreError>
    where
        T: Send,
        F: Fn(Option<&Value>) -> Result<Mutation<T>, StoreError> + Send + Sync,
    {
        let mut guard = self.lock()?;
        let entry_key = (kind, key.to_string());
        let mutation = apply(guard.get(&entry_key))?;
        match mutation {
            Mutation::Write { doc, output } => {
                guard.insert(entry_key, doc);
                Ok(output)
            }
            Mutation::Keep { output } => Ok(output),
        }
    }

    async fn read(&self, kind: RecordKind, key: &str) -> Result<Option<Value>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.get(&(kind, key.to_string())).cloned())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
