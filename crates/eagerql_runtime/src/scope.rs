//! Scopes and argument filters.
//!
//! A relation field turns its arguments into predicates in two ways:
//! argument filters (`argument` → `column <op> value`, skipped when the
//! argument is absent or null) and named scopes, which receive the whole
//! argument set. Both are folded into a [`BuilderDecorator`] that is applied
//! exactly once to the query of a fetch.

use crate::dataloader::key::canonical_json;
use crate::error::ConfigurationError;
use crate::resolver::ResolverArgs;
use crate::source::{Operator, Predicate, RelationQuery};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// The resolved arguments of one field occurrence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgumentSet {
    arguments: IndexMap<String, Value>,
}

impl ArgumentSet {
    /// Creates an empty argument set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an argument.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    /// Gets an argument by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }

    /// Returns true if there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    /// The arguments as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.arguments
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Serializes the arguments independently of their order.
    pub fn canonical(&self) -> String {
        canonical_json(&self.to_value())
    }
}

impl From<&ResolverArgs> for ArgumentSet {
    fn from(args: &ResolverArgs) -> Self {
        let mut arguments: Vec<_> = args
            .all()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        arguments.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            arguments: arguments.into_iter().collect(),
        }
    }
}

/// Maps one field argument to a predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentFilter {
    /// Argument name.
    pub argument: String,
    /// Column compared against the argument value.
    pub column: String,
    /// Comparison operator.
    #[serde(default = "default_operator", rename = "op")]
    pub operator: Operator,
}

fn default_operator() -> Operator {
    Operator::Eq
}

impl ArgumentFilter {
    /// An equality filter on the column of the same name as the argument.
    pub fn eq(argument: impl Into<String>) -> Self {
        let argument = argument.into();
        Self {
            column: argument.clone(),
            argument,
            operator: Operator::Eq,
        }
    }

    /// A filter with an explicit column and operator.
    pub fn new(argument: impl Into<String>, column: impl Into<String>, operator: Operator) -> Self {
        Self {
            argument: argument.into(),
            column: column.into(),
            operator,
        }
    }

    fn apply(&self, query: &mut RelationQuery, args: &ArgumentSet) {
        if let Some(value) = args.get(&self.argument).filter(|v| !v.is_null()) {
            query.filter(Predicate::new(&self.column, self.operator, value.clone()));
        }
    }
}

/// A named, reusable query predicate.
pub type ScopeFn = Arc<dyn Fn(&mut RelationQuery, &ArgumentSet) + Send + Sync>;

/// Registered scopes.
#[derive(Clone, Default)]
pub struct ScopeRegistry {
    scopes: FxHashMap<String, ScopeFn>,
}

impl ScopeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a scope callback.
    pub fn register<F>(&mut self, name: impl Into<String>, scope: F)
    where
        F: Fn(&mut RelationQuery, &ArgumentSet) + Send + Sync + 'static,
    {
        self.scopes.insert(name.into(), Arc::new(scope));
    }

    /// Registers a scope that adds a fixed list of predicates.
    pub fn register_predicates(&mut self, name: impl Into<String>, predicates: Vec<Predicate>) {
        self.register(name, move |query, _args| {
            for predicate in &predicates {
                query.filter(predicate.clone());
            }
        });
    }

    /// Gets a scope by name.
    pub fn get(&self, name: &str) -> Result<&ScopeFn, ConfigurationError> {
        self.scopes
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownScope(name.to_string()))
    }

    /// Returns true if a scope of this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.scopes.contains_key(name)
    }
}

impl fmt::Debug for ScopeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.scopes.keys().collect();
        names.sort();
        f.debug_struct("ScopeRegistry").field("scopes", &names).finish()
    }
}

/// Applies filters and scopes onto a relation query.
#[derive(Clone)]
pub struct BuilderDecorator {
    apply: Arc<dyn Fn(&mut RelationQuery) + Send + Sync>,
}

impl BuilderDecorator {
    /// A decorator that leaves the query untouched.
    pub fn identity() -> Self {
        Self::from_fn(|_| {})
    }

    /// Wraps a closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&mut RelationQuery) + Send + Sync + 'static,
    {
        Self { apply: Arc::new(f) }
    }

    /// Builds the decorator of a field: filters first, then scopes in order.
    ///
    /// Scopes are looked up here, so an unknown scope is reported before any
    /// load is registered.
    pub fn for_field(
        args: ArgumentSet,
        filters: &[ArgumentFilter],
        scopes: &[String],
        registry: &ScopeRegistry,
    ) -> Result<Self, ConfigurationError> {
        let scopes = scopes
            .iter()
            .map(|name| registry.get(name).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        let filters = filters.to_vec();

        Ok(Self::from_fn(move |query| {
            for filter in &filters {
                filter.apply(query, &args);
            }
            for scope in &scopes {
                scope(query, &args);
            }
        }))
    }

    /// Decorates `query`.
    pub fn apply(&self, query: &mut RelationQuery) {
        (self.apply)(query);
    }
}

impl fmt::Debug for BuilderDecorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BuilderDecorator")
    }
}
