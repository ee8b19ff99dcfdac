//! In-memory store and cache.
//!
//! Useful for tests and short-lived pipelines that don't need persistence.
//! All data is lost when the process exits.

use async_trait::async_trait;
use alloy_primitives::U256;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::PipelineError;
use crate::store::{
    compare_values, merge_document, sum_operand, Filter, FindOptions, ObjectCache, PersistentStore,
    SortOrder,
};

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, PipelineError> {
    m.lock()
        .map_err(|_| PipelineError::Storage("in-memory lock poisoned".into()))
}

/// In-memory document store.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .map(|c| c.get(collection).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Returns `true` if the collection holds no documents.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

fn sort_documents(docs: &mut [Value], options: &FindOptions) {
    if options.sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for s in &options.sort {
            let av = a.get(&s.field).unwrap_or(&Value::Null);
            let bv = b.get(&s.field).unwrap_or(&Value::Null);
            let ord = compare_values(av, bv).unwrap_or(Ordering::Equal);
            let ord = match s.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn insert(&self, collection: &str, doc: Value) -> Result<(), PipelineError> {
        lock(&self.collections)?
            .entry(collection.to_string())
            .or_default()
            .push(doc);
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        filter: &Filter,
        doc: Value,
    ) -> Result<(), PipelineError> {
        filter.validate()?;
        let mut collections = lock(&self.collections)?;
        let docs = collections.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|d| filter.matches(d)) {
            Some(existing) => merge_document(existing, doc),
            None => docs.push(doc),
        }
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Value>, PipelineError> {
        filter.validate()?;
        let mut docs: Vec<Value> = lock(&self.collections)?
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default();
        sort_documents(&mut docs, options);

        let skip = usize::try_from(options.skip).unwrap_or(usize::MAX);
        let limit = options
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        Ok(docs.into_iter().skip(skip).take(limit).collect())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, PipelineError> {
        filter.validate()?;
        Ok(lock(&self.collections)?
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).count() as u64)
            .unwrap_or(0))
    }

    async fn aggregate_sum(
        &self,
        collection: &str,
        filter: &Filter,
        field: &str,
    ) -> Result<U256, PipelineError> {
        filter.validate()?;
        let collections = lock(&self.collections)?;
        let Some(docs) = collections.get(collection) else {
            return Ok(U256::ZERO);
        };
        docs.iter()
            .filter(|d| filter.matches(d))
            .filter_map(|d| d.get(field).and_then(sum_operand))
            .try_fold(U256::ZERO, |acc, v| acc.checked_add(v))
            .ok_or_else(|| PipelineError::Storage(format!("sum of '{field}' overflows")))
    }
}

/// In-memory object cache without eviction.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectCache for MemoryCache {
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), PipelineError> {
        self.entries
            .lock()
            .map_err(|_| PipelineError::Cache("in-memory lock poisoned".into()))?
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| PipelineError::Cache("in-memory lock poisoned".into()))?
            .get(key)
            .cloned())
    }
}
