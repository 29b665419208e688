//! In-memory data source.
//!
//! Rows are plain JSON objects grouped by model name. Every call to
//! [`DataSource::eager_load`] counts as one round trip, which makes the store
//! useful for asserting how many fetches a query costs.

use crate::catalog::RelationDef;
use crate::dataloader::key::canonical_json;
use crate::error::SourceError;
use crate::source::{BoxFuture, DataSource, RelationQuery};
use indexmap::IndexMap;
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

/// One recorded round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRecord {
    /// Related model that was queried.
    pub model: String,
    /// Relation that was loaded.
    pub relation: String,
    /// Number of owner keys in the request.
    pub owners: usize,
}

/// A data source backed by in-memory tables.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<IndexMap<String, Vec<Value>>>,
    fetches: AtomicUsize,
    log: RwLock<Vec<FetchRecord>>,
    failing: RwLock<FxHashSet<String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds rows to a model's table.
    pub fn with_rows(self, model: impl Into<String>, rows: impl IntoIterator<Item = Value>) -> Self {
        self.insert_many(model, rows);
        self
    }

    /// Inserts one row.
    pub fn insert(&self, model: impl Into<String>, row: Value) {
        self.tables.write().entry(model.into()).or_default().push(row);
    }

    /// Inserts many rows.
    pub fn insert_many(&self, model: impl Into<String>, rows: impl IntoIterator<Item = Value>) {
        self.tables
            .write()
            .entry(model.into())
            .or_default()
            .extend(rows);
    }

    /// Returns every row of a model.
    pub fn all(&self, model: &str) -> Vec<Value> {
        self.tables.read().get(model).cloned().unwrap_or_default()
    }

    /// Makes every fetch of the named relation fail.
    pub fn fail_relation(&self, relation: impl Into<String>) {
        self.failing.write().insert(relation.into());
    }

    /// Number of round trips served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Round trips served so far, in order.
    pub fn fetch_log(&self) -> Vec<FetchRecord> {
        self.log.read().clone()
    }

    /// Clears the fetch counter and log.
    pub fn reset_stats(&self) {
        self.fetches.store(0, Ordering::SeqCst);
        self.log.write().clear();
    }

    fn select(
        &self,
        relation: &RelationDef,
        owner_keys: &[Value],
        query: &RelationQuery,
    ) -> Result<Vec<Value>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.log.write().push(FetchRecord {
            model: relation.related.clone(),
            relation: relation.name.clone(),
            owners: owner_keys.len(),
        });

        if self.failing.read().contains(&relation.name) {
            return Err(SourceError::new(format!(
                "fetching `{}` from `{}` failed",
                relation.name, relation.related
            )));
        }

        let wanted: FxHashSet<String> = owner_keys.iter().map(canonical_json).collect();
        let tables = self.tables.read();
        let mut rows: Vec<Value> = tables
            .get(&relation.related)
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        row.get(&relation.foreign_key)
                            .is_some_and(|key| wanted.contains(&canonical_json(key)))
                    })
                    .filter(|row| query.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        query.sort(&mut rows);

        trace!(
            relation = %relation.name,
            owners = owner_keys.len(),
            rows = rows.len(),
            "memory store fetch"
        );
        Ok(rows)
    }
}

impl DataSource for MemoryStore {
    fn eager_load<'a>(
        &'a self,
        relation: &'a RelationDef,
        owner_keys: &'a [Value],
        query: &'a RelationQuery,
    ) -> BoxFuture<'a, Result<Vec<Value>, SourceError>> {
        let result = self.select(relation, owner_keys, query);
        Box::pin(async move { result })
    }
}
