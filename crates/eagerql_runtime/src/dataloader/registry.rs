//! Per-execution batch loader registry.

use super::batch::RelationBatchLoader;
use super::deferred::Scheduler;
use super::key::{BatchKey, ParentKey};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Maps batch keys to their loaders for one execution.
///
/// The registry lives inside an [`ExecutionState`](crate::state::ExecutionState)
/// and is dropped with it, so nothing is shared between executions.
pub struct BatchLoaderRegistry {
    loaders: Mutex<FxHashMap<BatchKey, Arc<RelationBatchLoader>>>,
    scheduler: Arc<Scheduler>,
    loaded: Arc<LoadedRelations>,
}

impl BatchLoaderRegistry {
    /// Creates an empty registry whose loaders queue work on `scheduler`.
    pub fn new(scheduler: Arc<Scheduler>, loaded: Arc<LoadedRelations>) -> Self {
        Self {
            loaders: Mutex::new(FxHashMap::default()),
            scheduler,
            loaded,
        }
    }

    /// Returns the loader for `key`, creating it on first use.
    pub fn instance(&self, key: BatchKey) -> Arc<RelationBatchLoader> {
        let mut loaders = self.loaders.lock();
        if let Some(loader) = loaders.get(&key) {
            return Arc::clone(loader);
        }

        debug!(key = %key, "creating relation batch loader");
        let loader = Arc::new(RelationBatchLoader::new(
            key.clone(),
            Arc::clone(&self.scheduler),
            Arc::clone(&self.loaded),
        ));
        loaders.insert(key, Arc::clone(&loader));
        loader
    }

    /// Number of distinct keys seen.
    pub fn len(&self) -> usize {
        self.loaders.lock().len()
    }

    /// Returns true if no loader was created.
    pub fn is_empty(&self) -> bool {
        self.loaders.lock().is_empty()
    }

    /// Total number of parents registered across all loaders.
    pub fn parent_count(&self) -> usize {
        self.loaders
            .lock()
            .values()
            .map(|loader| loader.parent_count())
            .sum()
    }
}

impl fmt::Debug for BatchLoaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchLoaderRegistry")
            .field("loaders", &self.len())
            .finish()
    }
}

/// Relations materialized by eager-load middlewares during an execution, by
/// parent, relation name and scopes.
///
/// Relation fields never write here: their values are scoped, filtered or
/// paginated for one field and would shadow what a middleware loaded.
#[derive(Default)]
pub struct LoadedRelations {
    entries: Mutex<FxHashMap<(ParentKey, String, Vec<String>), Value>>,
}

impl LoadedRelations {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the loaded value of `relation` under `scopes` for `parent`.
    pub fn insert(&self, parent: ParentKey, relation: impl Into<String>, scopes: &[String], value: Value) {
        self.entries
            .lock()
            .insert((parent, relation.into(), scopes.to_vec()), value);
    }

    /// Gets the loaded value of `relation` under `scopes` for `parent`.
    pub fn get(&self, parent: &ParentKey, relation: &str, scopes: &[String]) -> Option<Value> {
        self.entries
            .lock()
            .get(&(parent.clone(), relation.to_string(), scopes.to_vec()))
            .cloned()
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl fmt::Debug for LoadedRelations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedRelations")
            .field("entries", &self.len())
            .finish()
    }
}
