//! Per-execution state.
//!
//! An [`ExecutionState`] is created by the executor at the start of every
//! top-level execution and dropped at its end. It owns everything whose
//! lifetime is exactly one execution: the batch loader registry, the wave
//! scheduler and the relations loaded so far.

use crate::dataloader::{BatchLoaderRegistry, LoadedRelations, Scheduler};
use crate::executor::ExecutorConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Unique identifier for an execution.
pub type ExecutionId = u64;

static NEXT_EXECUTION_ID: AtomicU64 = AtomicU64::new(1);

/// Execution state for one top-level query.
pub struct ExecutionState {
    id: ExecutionId,
    config: ExecutorConfig,
    phase: Mutex<ExecutionPhase>,
    scheduler: Arc<Scheduler>,
    registry: BatchLoaderRegistry,
    loaded: Arc<LoadedRelations>,
    fields_resolved: AtomicUsize,
    started_at: Instant,
    finished_at: Mutex<Option<Instant>>,
}

impl ExecutionState {
    /// Creates a new execution state.
    pub fn new(config: ExecutorConfig) -> Self {
        let scheduler = Arc::new(Scheduler::new());
        let loaded = Arc::new(LoadedRelations::new());
        Self {
            id: NEXT_EXECUTION_ID.fetch_add(1, Ordering::Relaxed),
            config,
            phase: Mutex::new(ExecutionPhase::Pending),
            registry: BatchLoaderRegistry::new(Arc::clone(&scheduler), Arc::clone(&loaded)),
            scheduler,
            loaded,
            fields_resolved: AtomicUsize::new(0),
            started_at: Instant::now(),
            finished_at: Mutex::new(None),
        }
    }

    /// The execution id.
    pub fn id(&self) -> ExecutionId {
        self.id
    }

    /// The executor settings in effect.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Returns true if relation fields are batched.
    pub fn batchload_relations(&self) -> bool {
        self.config.batchload_relations
    }

    /// The batch loader registry.
    pub fn registry(&self) -> &BatchLoaderRegistry {
        &self.registry
    }

    /// The wave scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Relations materialized by batch loaders.
    pub fn loaded(&self) -> &LoadedRelations {
        &self.loaded
    }

    /// The current phase.
    pub fn phase(&self) -> ExecutionPhase {
        *self.phase.lock()
    }

    /// Transitions to a new phase.
    pub fn transition_to(&self, phase: ExecutionPhase) {
        *self.phase.lock() = phase;
        if phase.is_terminal() {
            self.finished_at.lock().get_or_insert_with(Instant::now);
        }
    }

    pub(crate) fn record_field(&self) {
        self.fields_resolved.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the execution statistics.
    pub fn stats(&self) -> ExecutionStats {
        let end = (*self.finished_at.lock()).unwrap_or_else(Instant::now);
        ExecutionStats {
            fields_resolved: self.fields_resolved.load(Ordering::Relaxed),
            waves: self.scheduler.waves(),
            batches: self.scheduler.dispatched(),
            batch_keys: self.registry.len(),
            parents: self.registry.parent_count(),
            execution_duration: end.saturating_duration_since(self.started_at),
        }
    }
}

impl fmt::Debug for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionState")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .field("registry", &self.registry)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

/// Phase of query execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    /// Waiting to start.
    Pending,
    /// Currently executing.
    Running,
    /// Completed without field errors.
    Completed,
    /// Completed with at least one field error.
    Failed,
}

impl ExecutionPhase {
    /// Returns true for phases an execution never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Statistics for query execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// Total fields resolved.
    pub fields_resolved: usize,

    /// Number of waves that ended with queued batch work.
    pub waves: usize,

    /// Number of batch dispatches run.
    pub batches: usize,

    /// Number of distinct batch keys seen.
    pub batch_keys: usize,

    /// Number of distinct parents registered across all batches.
    pub parents: usize,

    /// Wall time of the execution.
    pub execution_duration: Duration,
}
