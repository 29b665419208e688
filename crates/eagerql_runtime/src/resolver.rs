//! Resolver system.
//!
//! Resolvers are registered per `Type.field` in a [`ResolverMap`]. Fields
//! without one read the property of the same name from their parent.
//! Middleware wraps an already registered resolver with [`ResolverMap::wrap`].

use crate::error::{ConfigurationError, LoaderError};
use crate::executor::{Context, FieldError, PathSegment};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Arguments passed to a resolver.
#[derive(Debug, Clone, Default)]
pub struct ResolverArgs {
    args: HashMap<String, Value>,
}

impl ResolverArgs {
    /// Creates empty resolver args.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates resolver args from (name, value) pairs.
    pub fn from_pairs(pairs: Vec<(String, Value)>) -> Self {
        Self {
            args: pairs.into_iter().collect(),
        }
    }

    /// Gets an argument by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// Gets a required argument as `T`.
    pub fn require<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T, ResolverError> {
        let value = self
            .args
            .get(name)
            .ok_or_else(|| ResolverError::MissingArgument(name.to_string()))?;
        serde_json::from_value(value.clone())
            .map_err(|e| ResolverError::ArgumentParseError(name.to_string(), e.to_string()))
    }

    /// Returns all arguments.
    pub fn all(&self) -> &HashMap<String, Value> {
        &self.args
    }

    /// Sets an argument.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.args.insert(name.into(), value);
    }
}

/// Info about the field being resolved.
#[derive(Debug, Clone)]
pub struct ResolverInfo {
    /// The field name.
    pub field_name: String,

    /// The named return type.
    pub return_type: String,

    /// The type the field is declared on.
    pub parent_type: String,

    /// Response path to this field, list indices included.
    pub path: Vec<PathSegment>,
}

impl ResolverInfo {
    pub fn new(field_name: impl Into<String>, parent_type: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            return_type: String::new(),
            parent_type: parent_type.into(),
            path: Vec::new(),
        }
    }

    pub fn with_return_type(mut self, ty: impl Into<String>) -> Self {
        self.return_type = ty.into();
        self
    }

    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = path;
        self
    }
}

/// Result type for resolvers.
pub type ResolverResult = Result<Value, ResolverError>;

/// Future returned by [`Resolver::resolve`].
pub type ResolverFuture<'a> = Pin<Box<dyn Future<Output = ResolverResult> + Send + 'a>>;

/// Error from a resolver.
#[derive(Debug, Clone, Error)]
pub enum ResolverError {
    /// The parent has no such field.
    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Failed to parse argument '{0}': {1}")]
    ArgumentParseError(String, String),

    /// Relation loading failed.
    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error("{0}")]
    Custom(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResolverError {
    /// Returns the error code reported to clients, if any.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Loader(err) => Some(err.code()),
            Self::MissingArgument(_) | Self::ArgumentParseError(..) => Some("BAD_USER_INPUT"),
            Self::Internal(_) => Some("INTERNAL_ERROR"),
            Self::FieldNotFound(_) | Self::Custom(_) => None,
        }
    }
}

impl From<ConfigurationError> for ResolverError {
    fn from(error: ConfigurationError) -> Self {
        Self::Loader(error.into())
    }
}

impl From<ResolverError> for FieldError {
    fn from(error: ResolverError) -> Self {
        let field_error = FieldError::new(error.to_string());
        match error.code() {
            Some(code) => field_error.with_code(code),
            None => field_error,
        }
    }
}

/// Trait for field resolvers.
pub trait Resolver: Send + Sync {
    /// Resolves a field value.
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a>;
}

/// A boxed resolver.
pub type BoxedResolver = Box<dyn Resolver>;

impl Resolver for BoxedResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        self.as_ref().resolve(parent, args, ctx, info)
    }
}

type SyncResolverFn =
    Arc<dyn Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult + Send + Sync>;

/// A resolver backed by a synchronous function.
pub struct FnResolver {
    func: SyncResolverFn,
}

impl FnResolver {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        Self { func: Arc::new(f) }
    }
}

impl Resolver for FnResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        let result = (self.func)(parent, args, ctx, info);
        Box::pin(async move { result })
    }
}

/// Reads the field from the parent object, falling back to the snake_case
/// column (`userId` reads `user_id`).
pub struct DefaultResolver;

impl Resolver for DefaultResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        _args: &'a ResolverArgs,
        _ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        let field_name = &info.field_name;
        let result = match parent {
            Value::Object(map) => Ok(map
                .get(field_name)
                .or_else(|| map.get(&to_snake_case(field_name)))
                .cloned()
                .unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            _ => Err(ResolverError::FieldNotFound(field_name.clone())),
        };
        Box::pin(async move { result })
    }
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

/// Resolvers by `TypeName.fieldName`.
#[derive(Default)]
pub struct ResolverMap {
    resolvers: HashMap<String, BoxedResolver>,
}

impl ResolverMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resolver for a field.
    pub fn register<R: Resolver + 'static>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: R,
    ) {
        self.resolvers
            .insert(field_key(type_name, field_name), Box::new(resolver));
    }

    /// Registers a sync function as a resolver.
    pub fn register_fn<F>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        self.register(type_name, field_name, FnResolver::new(f));
    }

    /// The resolver of a field; [`DefaultResolver`] when none is registered.
    pub fn get(&self, type_name: &str, field_name: &str) -> &dyn Resolver {
        match self.resolvers.get(&format!("{type_name}.{field_name}")) {
            Some(resolver) => resolver.as_ref(),
            None => &DefaultResolver,
        }
    }

    /// Replaces the resolver of a field with `f(current)`.
    ///
    /// The current resolver is the registered one, or a [`DefaultResolver`] if
    /// none is. Wrapping the same field repeatedly nests the wrappers, the last
    /// one outermost.
    pub fn wrap<F, R>(&mut self, type_name: impl Into<String>, field_name: impl Into<String>, f: F)
    where
        F: FnOnce(BoxedResolver) -> R,
        R: Resolver + 'static,
    {
        let key = field_key(type_name, field_name);
        let inner = self
            .resolvers
            .remove(&key)
            .unwrap_or_else(|| Box::new(DefaultResolver) as BoxedResolver);
        self.resolvers.insert(key, Box::new(f(inner)));
    }

    /// Returns true if a resolver is registered for the field.
    pub fn contains(&self, type_name: &str, field_name: &str) -> bool {
        self.resolvers
            .contains_key(&format!("{type_name}.{field_name}"))
    }
}

fn field_key(type_name: impl Into<String>, field_name: impl Into<String>) -> String {
    format!("{}.{}", type_name.into(), field_name.into())
}

impl Debug for ResolverMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverMap")
            .field("resolver_count", &self.resolvers.len())
            .finish()
    }
}
