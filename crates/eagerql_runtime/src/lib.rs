//! Runtime for eagerql.
//!
//! This crate provides a GraphQL execution runtime with batched relation
//! loading:
//! - `executor`: Query execution in waves
//! - `query`: Query plans and the selection planner
//! - `resolver`: Resolver traits and the resolver map
//! - `directives`: Relation fields and the eager-load middleware
//! - `dataloader`: Batch loaders, the per-execution registry and scheduler
//! - `catalog`: Models and their relations
//! - `source`: Data sources and association metadata
//! - `scope`: Argument filters, named scopes and query decoration
//! - `pagination`: Per-parent pagination of relation fields
//! - `memory`: In-memory data source
//! - `state`: Per-execution state and statistics
//! - `error`: Configuration and loader errors

pub mod catalog;
pub mod dataloader;
pub mod directives;
pub mod error;
pub mod executor;
pub mod memory;
pub mod pagination;
pub mod query;
pub mod resolver;
pub mod scope;
pub mod source;
pub mod state;

pub use catalog::{Catalog, CatalogBuilder, ModelDef, RelationDef, RelationKind};
pub use dataloader::{
    BatchKey, BatchLoaderRegistry, Deferred, LoadedRelations, LoaderShape, ParentKey,
    RelationBatchLoader, RelationLoader, Scheduler,
};
pub use directives::{RelationDirective, RelationField, RelationSchema, WithRelation};
pub use error::{ConfigurationError, LoaderError, LoaderResult, SourceError};
pub use executor::{Context, Executor, ExecutorConfig, FieldError, PathSegment, Response};
pub use memory::{FetchRecord, MemoryStore};
pub use pagination::{Page, PaginationArgs, PaginationConfig, PaginationType};
pub use query::{FieldInfo, PlanError, PlanNode, QueryPlan, QueryPlanner, Selection};
pub use resolver::{
    BoxedResolver, FnResolver, Resolver, ResolverArgs, ResolverError, ResolverInfo, ResolverMap,
};
pub use scope::{ArgumentFilter, ArgumentSet, BuilderDecorator, ScopeRegistry};
pub use source::{Association, DataSource, Operator, Predicate, RelationQuery, SortOrder};
pub use state::{ExecutionPhase, ExecutionState, ExecutionStats};
