//! Batched relation loading for N+1 prevention.
//!
//! When a relation field resolves for many parents (every `comments` under a
//! list of `posts`), each resolver registers its parent with the
//! [`RelationBatchLoader`] for its [`BatchKey`] and receives a [`Deferred`].
//! At the end of the wave the [`Scheduler`] dispatches every loader once,
//! the loader issues one fetch for all its parents, and the rows are fanned
//! back out to each parent's deferred value.
//!
//! # Example
//!
//! ```ignore
//! let loader = registry.instance(key);
//! loader.attach_strategy(association, RelationLoader::simple(decorator))?;
//! let comments = loader.load(&post)?.await?;
//! ```

pub mod batch;
pub mod deferred;
pub mod key;
pub mod registry;
pub mod strategy;

pub use batch::RelationBatchLoader;
pub use deferred::{Deferred, Dispatch, Scheduler};
pub use key::{canonical_json, BatchKey, ParentKey};
pub use registry::{BatchLoaderRegistry, LoadedRelations};
pub use strategy::{LoaderShape, RelationLoader};
