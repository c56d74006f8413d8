//! In-memory store used by tests and one-shot runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Filter, Store, StoreError, StoreProvider};

type Collections = HashMap<String, BTreeMap<String, Value>>;

/// Thread-safe in-memory document store. Cloning yields a handle to the same
/// underlying data, which is what worker-per-connection tests rely on.
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Arc<RwLock<Collections>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_one(
        &self,
        collection: &str,
        doc_key: &str,
        doc: Value,
    ) -> Result<(), StoreError> {
        let mut guard = self.collections.write().await;
        guard
            .entry(collection.to_string())
            .or_default()
            .insert(doc_key.to_string(), doc);
        Ok(())
    }

    async fn bulk_upsert(
        &self,
        collection: &str,
        docs: Vec<(String, Value)>,
    ) -> Result<u64, StoreError> {
        let mut guard = self.collections.write().await;
        let coll = guard.entry(collection.to_string()).or_default();
        let count = docs.len() as u64;
        for (doc_key, doc) in docs {
            coll.insert(doc_key, doc);
        }
        Ok(count)
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut guard = self.collections.write().await;
        let Some(coll) = guard.get_mut(collection) else {
            return Ok(0);
        };
        let before = coll.len();
        coll.retain(|_, doc| !filter.matches(doc));
        Ok((before - coll.len()) as u64)
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        sort_by: Option<&str>,
    ) -> Result<Vec<Value>, StoreError> {
        let guard = self.collections.read().await;
        let mut docs: Vec<Value> = guard
            .get(collection)
            .map(|coll| {
                coll.values()
                    .filter(|doc| filter.matches(doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(field) = sort_by {
            docs.sort_by(|a, b| {
                let left = a.get(field).and_then(Value::as_str).unwrap_or_default();
                let right = b.get(field).and_then(Value::as_str).unwrap_or_default();
                left.cmp(right)
            });
        }
        Ok(docs)
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let guard = self.collections.read().await;
        let count = guard
            .get(collection)
            .map(|coll| coll.values().filter(|doc| filter.matches(doc)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }
}

/// Provider handing out handles to one shared [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryStoreProvider {
    store: MemoryStore,
}

impl MemoryStoreProvider {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StoreProvider for MemoryStoreProvider {
    async fn open(&self) -> Result<Arc<dyn Store>, StoreError> {
        Ok(Arc::new(self.store.clone()))
    }
}
