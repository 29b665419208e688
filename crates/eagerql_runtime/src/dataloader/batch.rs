//! The batch loader of one relation field position.

use super::deferred::{Deferred, Dispatch, Scheduler};
use super::key::{BatchKey, ParentKey};
use super::registry::LoadedRelations;
use super::strategy::RelationLoader;
use crate::error::{ConfigurationError, LoaderError};
use crate::source::{Association, BoxFuture};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Clone)]
struct Target {
    association: Association,
    strategy: RelationLoader,
}

struct PendingLoad {
    parent: Value,
    deferred: Deferred<Value>,
    dispatched: bool,
}

#[derive(Default)]
struct State {
    target: Option<Target>,
    parents: IndexMap<ParentKey, PendingLoad>,
    queued: bool,
}

/// Collects the parents of one [`BatchKey`] during a wave and loads their
/// relation with a single fetch when the wave ends.
///
/// The first attached strategy wins. Parents are deduplicated by primary key;
/// registering a parent twice returns the same [`Deferred`].
pub struct RelationBatchLoader {
    key: BatchKey,
    scheduler: Arc<Scheduler>,
    loaded: Arc<LoadedRelations>,
    state: Mutex<State>,
    fetches: AtomicUsize,
}

impl RelationBatchLoader {
    pub(crate) fn new(key: BatchKey, scheduler: Arc<Scheduler>, loaded: Arc<LoadedRelations>) -> Self {
        Self {
            key,
            scheduler,
            loaded,
            state: Mutex::new(State::default()),
            fetches: AtomicUsize::new(0),
        }
    }

    /// The key this loader batches for.
    pub fn key(&self) -> &BatchKey {
        &self.key
    }

    /// Returns true once a strategy is attached.
    pub fn has_strategy(&self) -> bool {
        self.state.lock().target.is_some()
    }

    /// Attaches the loading strategy.
    ///
    /// Attaching the same shape for the same relation again is a no-op. A
    /// different strategy is rejected and the attached one stays in place.
    pub fn attach_strategy(
        &self,
        association: Association,
        strategy: RelationLoader,
    ) -> Result<(), ConfigurationError> {
        let mut state = self.state.lock();
        if let Some(target) = &state.target {
            if target.association.same_target(&association)
                && target.strategy.shape() == strategy.shape()
            {
                return Ok(());
            }
            return Err(ConfigurationError::DivergentStrategy {
                key: self.key.to_string(),
                attached: target.strategy.shape().to_string(),
                requested: strategy.shape().to_string(),
            });
        }

        trace!(key = %self.key, strategy = %strategy.shape(), "attaching relation loader");
        state.target = Some(Target {
            association,
            strategy,
        });
        Ok(())
    }

    /// Registers `parent` and returns the value its relation resolves to.
    ///
    /// The loader queues itself on the scheduler once per pending set, so all
    /// parents registered in the same wave share one fetch. A parent arriving
    /// after its batch was dispatched starts a new pending set.
    pub fn load(self: &Arc<Self>, parent: &Value) -> Result<Deferred<Value>, LoaderError> {
        let mut state = self.state.lock();
        let target = state
            .target
            .as_ref()
            .ok_or_else(|| ConfigurationError::MissingStrategy(self.key.to_string()))?;
        let parent_key = target.association.parent_key(parent)?;

        if let Some(pending) = state.parents.get(&parent_key) {
            return Ok(pending.deferred.clone());
        }

        trace!(key = %self.key, parent = parent_key.id(), "registering parent");
        let deferred = Deferred::new();
        state.parents.insert(
            parent_key,
            PendingLoad {
                parent: parent.clone(),
                deferred: deferred.clone(),
                dispatched: false,
            },
        );

        if !state.queued {
            state.queued = true;
            let work: Arc<dyn Dispatch> = self.clone();
            self.scheduler.defer(work);
        }
        Ok(deferred)
    }

    /// Number of distinct parents registered so far.
    pub fn parent_count(&self) -> usize {
        self.state.lock().parents.len()
    }

    /// Number of fetches this loader issued.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    async fn run(&self) {
        let (target, batch) = {
            let mut state = self.state.lock();
            state.queued = false;
            let Some(target) = state.target.clone() else {
                return;
            };
            let batch: Vec<(ParentKey, Value, Deferred<Value>)> = state
                .parents
                .iter_mut()
                .filter(|(_, pending)| !pending.dispatched)
                .map(|(key, pending)| {
                    pending.dispatched = true;
                    (key.clone(), pending.parent.clone(), pending.deferred.clone())
                })
                .collect();
            (target, batch)
        };

        if batch.is_empty() {
            return;
        }

        self.fetches.fetch_add(1, Ordering::SeqCst);
        debug!(key = %self.key, parents = batch.len(), "dispatching relation batch");

        let parents: Vec<Value> = batch.iter().map(|(_, parent, _)| parent.clone()).collect();
        match target.strategy.load(&target.association, &parents).await {
            Ok(values) => {
                for ((parent_key, _, deferred), value) in batch.into_iter().zip(values) {
                    if self.key.is_eager_load() {
                        self.loaded.insert(
                            parent_key,
                            self.key.relation(),
                            self.key.scopes(),
                            value.clone(),
                        );
                    }
                    deferred.resolve(Ok(value));
                }
            }
            Err(err) => {
                warn!(key = %self.key, parents = batch.len(), error = %err, "relation batch failed");
                for (_, _, deferred) in batch {
                    deferred.resolve(Err(err.clone()));
                }
            }
        }
    }
}

impl Dispatch for RelationBatchLoader {
    fn dispatch(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move { self.run().await })
    }
}

impl fmt::Debug for RelationBatchLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationBatchLoader")
            .field("key", &self.key)
            .field("parents", &self.parent_count())
            .field("fetches", &self.fetch_count())
            .finish()
    }
}
