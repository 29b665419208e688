//! Query execution.
//!
//! The executor walks a [`QueryPlan`] inside a single task. Sibling fields and
//! list items are resolved with `join_all`, so one poll of the execution runs
//! every resolver that can make progress. When all of them are waiting on
//! batched relations the wave is over and the scheduler dispatches the queued
//! batches before execution resumes.

use crate::pagination::PaginationConfig;
use crate::query::{FieldInfo, PlanNode, QueryPlan};
use crate::resolver::{ResolverArgs, ResolverInfo, ResolverMap};
use crate::dataloader::ParentKey;
use crate::state::{ExecutionPhase, ExecutionState, ExecutionStats};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Batch relation fields. When off, every relation field loads on its own.
    pub batchload_relations: bool,
    /// Pagination defaults for paginated relation fields.
    pub pagination: PaginationConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            batchload_relations: true,
            pagination: PaginationConfig::default(),
        }
    }
}

/// The query executor.
pub struct Executor {
    config: ExecutorConfig,
    resolvers: Arc<ResolverMap>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("resolvers", &self.resolvers)
            .finish()
    }
}

impl Executor {
    /// Creates a new executor.
    pub fn new() -> Self {
        Self {
            config: ExecutorConfig::default(),
            resolvers: Arc::new(ResolverMap::new()),
        }
    }

    /// Creates an executor with configuration.
    pub fn with_config(config: ExecutorConfig) -> Self {
        Self {
            config,
            resolvers: Arc::new(ResolverMap::new()),
        }
    }

    /// Creates an executor with resolvers.
    pub fn with_resolvers(resolvers: ResolverMap) -> Self {
        Self {
            config: ExecutorConfig::default(),
            resolvers: Arc::new(resolvers),
        }
    }

    /// Creates an executor with config and resolvers.
    pub fn new_with(config: ExecutorConfig, resolvers: ResolverMap) -> Self {
        Self {
            config,
            resolvers: Arc::new(resolvers),
        }
    }

    /// Gets a reference to the resolvers.
    pub fn resolvers(&self) -> &ResolverMap {
        &self.resolvers
    }

    /// Gets the configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Executes a query plan.
    pub async fn execute(&self, plan: &QueryPlan, ctx: &Context) -> Response {
        self.run(plan, ctx).await.0
    }

    /// Executes a query plan and returns the execution statistics with the
    /// response.
    ///
    /// Every call gets a fresh [`ExecutionState`]; batch loaders never
    /// outlive the call.
    pub async fn run(&self, plan: &QueryPlan, ctx: &Context) -> (Response, ExecutionStats) {
        let state = Arc::new(ExecutionState::new(self.config.clone()));
        let exec_ctx = ExecutionContext {
            ctx: ctx.clone().with_execution(Arc::clone(&state)),
            resolvers: Arc::clone(&self.resolvers),
            state: Arc::clone(&state),
            errors: Mutex::new(Vec::new()),
        };

        debug!(
            execution = state.id(),
            operation = plan.operation_name.as_deref().unwrap_or("<anonymous>"),
            batched = self.config.batchload_relations,
            "starting execution"
        );
        state.transition_to(ExecutionPhase::Running);

        // Get root value (empty object for Query/Mutation)
        let root_value = Value::Object(serde_json::Map::new());
        let data = state
            .scheduler()
            .drive(execute_node(&plan.root, root_value, Vec::new(), &exec_ctx))
            .await;

        let errors = std::mem::take(&mut *exec_ctx.errors.lock());
        state.transition_to(if errors.is_empty() {
            ExecutionPhase::Completed
        } else {
            ExecutionPhase::Failed
        });

        let stats = state.stats();
        debug!(
            execution = state.id(),
            waves = stats.waves,
            batches = stats.batches,
            errors = errors.len(),
            "execution finished"
        );

        let response = Response {
            data: Some(data),
            errors: (!errors.is_empty()).then_some(errors),
        };
        (response, stats)
    }
}

type NodeFuture<'a> = Pin<Box<dyn Future<Output = Value> + Send + 'a>>;

/// Executes a plan node.
fn execute_node<'a>(
    node: &'a PlanNode,
    parent: Value,
    path: Vec<PathSegment>,
    ctx: &'a ExecutionContext,
) -> NodeFuture<'a> {
    Box::pin(async move {
        match node {
            PlanNode::Parallel(nodes) => execute_parallel(nodes, parent, path, ctx).await,
            PlanNode::Field {
                info,
                response_name,
                children,
            } => execute_field(info, response_name, children, parent, path, ctx).await,
            PlanNode::Leaf { field } => execute_leaf(field, parent, path, ctx).await,
            PlanNode::TypeCondition { type_name, node } => {
                // Parents without __typename are assumed to match
                match parent.get("__typename").and_then(Value::as_str) {
                    Some(typename) if typename != type_name => {
                        Value::Object(serde_json::Map::new())
                    }
                    _ => execute_node(node, parent, path, ctx).await,
                }
            }
        }
    })
}

/// Executes nodes concurrently within the current wave.
async fn execute_parallel(
    nodes: &[PlanNode],
    parent: Value,
    path: Vec<PathSegment>,
    ctx: &ExecutionContext,
) -> Value {
    let values = join_all(
        nodes
            .iter()
            .map(|node| execute_node(node, parent.clone(), path.clone(), ctx)),
    )
    .await;

    let mut result = serde_json::Map::new();
    for value in values {
        merge_object(&mut result, value);
    }
    Value::Object(result)
}

fn merge_object(target: &mut serde_json::Map<String, Value>, value: Value) {
    if let Value::Object(map) = value {
        for (k, v) in map {
            target.insert(k, v);
        }
    }
}

/// Executes a field with nested selections.
async fn execute_field(
    info: &FieldInfo,
    response_name: &str,
    children: &PlanNode,
    parent: Value,
    mut path: Vec<PathSegment>,
    ctx: &ExecutionContext,
) -> Value {
    let field_value = resolve_field(info, &parent, path.clone(), ctx).await;
    path.push(PathSegment::Field(info.response_key().to_string()));

    // Lists execute their children for every item in the same wave
    let result = match field_value {
        Value::Array(items) => {
            let items = items.into_iter().enumerate().map(|(i, item)| {
                let mut child_path = path.clone();
                child_path.push(PathSegment::Index(i));
                execute_node(children, item, child_path, ctx)
            });
            Value::Array(join_all(items).await)
        }
        Value::Null => Value::Null,
        other => execute_node(children, other, path, ctx).await,
    };

    let mut obj = serde_json::Map::new();
    obj.insert(response_name.to_string(), result);
    Value::Object(obj)
}

/// Executes a leaf field.
async fn execute_leaf(
    info: &FieldInfo,
    parent: Value,
    path: Vec<PathSegment>,
    ctx: &ExecutionContext,
) -> Value {
    let response_key = info.response_key();
    let value = resolve_field(info, &parent, path, ctx).await;

    let mut obj = serde_json::Map::new();
    obj.insert(response_key.to_string(), value);
    Value::Object(obj)
}

/// Resolves a single field.
async fn resolve_field(
    info: &FieldInfo,
    parent: &Value,
    mut path: Vec<PathSegment>,
    ctx: &ExecutionContext,
) -> Value {
    ctx.state.record_field();

    // Handle __typename specially
    if info.is_introspection && info.name == "__typename" {
        return parent
            .get("__typename")
            .cloned()
            .unwrap_or_else(|| Value::String(info.parent_type.clone()));
    }

    let args = ResolverArgs::from_pairs(info.arguments.clone());

    path.push(PathSegment::Field(info.response_key().to_string()));

    let resolver_info = ResolverInfo::new(&info.name, &info.parent_type)
        .with_return_type(&info.return_type)
        .with_path(path.clone());

    let resolver = ctx.resolvers.get(&info.parent_type, &info.name);
    match resolver.resolve(parent, &args, &ctx.ctx, &resolver_info).await {
        Ok(value) => value,
        Err(e) => {
            ctx.errors.lock().push(FieldError::from(e).with_path(path));
            Value::Null
        }
    }
}

struct ExecutionContext {
    ctx: Context,
    resolvers: Arc<ResolverMap>,
    state: Arc<ExecutionState>,
    errors: Mutex<Vec<FieldError>>,
}

/// Execution context handed to resolvers.
#[derive(Debug, Clone, Default)]
pub struct Context {
    execution: Option<Arc<ExecutionState>>,
}

impl Context {
    /// Creates a context that is not bound to an execution yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context bound to a fresh execution.
    ///
    /// The executor does this for every call; resolvers tested outside an
    /// executor can use it directly.
    pub fn for_execution(config: ExecutorConfig) -> Self {
        Self::new().with_execution(Arc::new(ExecutionState::new(config)))
    }

    /// Binds the context to an execution.
    pub fn with_execution(mut self, execution: Arc<ExecutionState>) -> Self {
        self.execution = Some(execution);
        self
    }

    /// The execution this context belongs to.
    pub fn execution(&self) -> Option<&ExecutionState> {
        self.execution.as_deref()
    }

    /// A relation of the parent `model` with primary key `id`, as loaded by an
    /// unscoped eager-load middleware during this execution.
    pub fn loaded_relation(&self, model: &str, id: &Value, relation: &str) -> Option<Value> {
        self.loaded_scoped_relation(model, id, relation, &[])
    }

    /// Like [`loaded_relation`](Self::loaded_relation), for a middleware that
    /// applied `scopes`.
    pub fn loaded_scoped_relation(
        &self,
        model: &str,
        id: &Value,
        relation: &str,
        scopes: &[String],
    ) -> Option<Value> {
        self.execution()?
            .loaded()
            .get(&ParentKey::new(model, id), relation, scopes)
    }
}

/// A GraphQL response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// The data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// The errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

impl Response {
    /// Returns true if the response has errors.
    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }
}

/// A field error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    /// The error message.
    pub message: String,
    /// The path to the field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,
    /// Error extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<HashMap<String, serde_json::Value>>,
}

/// A path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl FieldError {
    /// Creates a new field error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    /// Adds a path to the error.
    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = Some(path);
        self
    }

    /// Adds an extension.
    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// Sets the error code extension.
    pub fn with_code(self, code: impl Into<String>) -> Self {
        self.with_extension("code", serde_json::Value::String(code.into()))
    }

    /// The error code extension, if set.
    pub fn code(&self) -> Option<&str> {
        self.extensions.as_ref()?.get("code")?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{FnResolver, ResolverMap};
    use serde_json::json;

    fn leaf(name: &str, parent_type: &str) -> PlanNode {
        PlanNode::Leaf {
            field: FieldInfo::new(name, parent_type, "String"),
        }
    }

    fn user_plan(field: &str) -> QueryPlan {
        QueryPlan::new(PlanNode::Field {
            info: FieldInfo::new(field, "Query", "User"),
            response_name: field.to_string(),
            children: Box::new(PlanNode::Parallel(vec![leaf("id", "User"), leaf("name", "User")])),
        })
    }

    #[tokio::test]
    async fn test_execute_simple_query() {
        let mut resolvers = ResolverMap::new();

        resolvers.register(
            "Query",
            "user",
            FnResolver::new(|_parent, _args, _ctx, _info| Ok(json!({"id": "1", "name": "Alice"}))),
        );

        let executor = Executor::with_resolvers(resolvers);
        let response = executor.execute(&user_plan("user"), &Context::new()).await;

        assert!(response.data.is_some());
        assert!(!response.has_errors());

        let data = response.data.unwrap();
        assert_eq!(data["user"]["id"], "1");
        assert_eq!(data["user"]["name"], "Alice");
    }

    #[tokio::test]
    async fn test_execute_typename() {
        let executor = Executor::with_resolvers(ResolverMap::new());
        let plan = QueryPlan::new(PlanNode::Leaf {
            field: FieldInfo::new("__typename", "Query", "String"),
        });

        let response = executor.execute(&plan, &Context::new()).await;

        let data = response.data.unwrap();
        assert_eq!(data["__typename"], "Query");
    }

    #[tokio::test]
    async fn test_execute_with_arguments() {
        let mut resolvers = ResolverMap::new();

        resolvers.register_fn("Query", "user", |_parent, args, _ctx, _info| {
            let id: String = args.require("id")?;
            Ok(json!({"id": id, "name": "User"}))
        });

        let executor = Executor::with_resolvers(resolvers);
        let plan = QueryPlan::new(PlanNode::Leaf {
            field: FieldInfo::new("user", "Query", "User").with_argument("id", json!("42")),
        });

        let response = executor.execute(&plan, &Context::new()).await;

        let data = response.data.unwrap();
        assert_eq!(data["user"]["id"], "42");
    }

    #[tokio::test]
    async fn test_execute_with_error() {
        let mut resolvers = ResolverMap::new();

        resolvers.register_fn("Query", "user", |_parent, _args, _ctx, _info| {
            Err(crate::resolver::ResolverError::Custom(
                "User not found".to_string(),
            ))
        });

        let executor = Executor::with_resolvers(resolvers);
        let (response, stats) = executor.run(&user_plan("user"), &Context::new()).await;

        assert!(response.has_errors());
        let errors = response.errors.unwrap();
        assert!(errors[0].message.contains("User not found"));
        assert_eq!(errors[0].path, Some(vec![PathSegment::Field("user".into())]));
        assert_eq!(response.data.unwrap()["user"], Value::Null);
        assert_eq!(stats.fields_resolved, 1);
    }

    #[tokio::test]
    async fn test_execute_list_field() {
        let mut resolvers = ResolverMap::new();

        resolvers.register_fn("Query", "users", |_parent, _args, _ctx, _info| {
            Ok(json!([
                {"id": "1", "name": "Alice"},
                {"id": "2", "name": "Bob"}
            ]))
        });

        let executor = Executor::with_resolvers(resolvers);
        let response = executor.execute(&user_plan("users"), &Context::new()).await;

        let data = response.data.unwrap();
        let users = data["users"].as_array().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0]["id"], "1");
        assert_eq!(users[1]["name"], "Bob");
    }

    #[tokio::test]
    async fn test_type_condition() {
        let mut resolvers = ResolverMap::new();
        resolvers.register_fn("Query", "feed", |_parent, _args, _ctx, _info| {
            Ok(json!([
                {"__typename": "Post", "title": "hello"},
                {"__typename": "Video", "title": "clip"}
            ]))
        });

        let plan = QueryPlan::new(PlanNode::Field {
            info: FieldInfo::new("feed", "Query", "FeedItem"),
            response_name: "feed".into(),
            children: Box::new(PlanNode::Parallel(vec![
                leaf("__typename", "FeedItem"),
                PlanNode::TypeCondition {
                    type_name: "Post".into(),
                    node: Box::new(leaf("title", "Post")),
                },
            ])),
        });

        let response = Executor::with_resolvers(resolvers)
            .execute(&plan, &Context::new())
            .await;
        let data = response.data.unwrap();
        assert_eq!(data["feed"][0], json!({"__typename": "Post", "title": "hello"}));
        assert_eq!(data["feed"][1], json!({"__typename": "Video"}));
    }

    #[tokio::test]
    async fn test_each_run_gets_a_fresh_execution() {
        let mut resolvers = ResolverMap::new();
        resolvers.register_fn("Query", "execution", |_parent, _args, ctx, _info| {
            let id = ctx.execution().map(ExecutionState::id);
            Ok(json!(id))
        });

        let executor = Executor::with_resolvers(resolvers);
        let plan = QueryPlan::new(leaf("execution", "Query"));
        let first = executor.execute(&plan, &Context::new()).await.data.unwrap();
        let second = executor.execute(&plan, &Context::new()).await.data.unwrap();

        assert!(first["execution"].is_u64());
        assert_ne!(first["execution"], second["execution"]);
    }

    #[test]
    fn test_config_deserialize() {
        let config: ExecutorConfig = serde_json::from_value(json!({
            "batchloadRelations": false,
            "pagination": {"maxCount": 50}
        }))
        .unwrap();
        assert!(!config.batchload_relations);
        assert_eq!(config.pagination.default_count, Some(10));
        assert_eq!(config.pagination.max_count, Some(50));

        let config: ExecutorConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, ExecutorConfig::default());
    }

    #[test]
    fn test_context_reads_eager_loaded_relations() {
        assert!(Context::new().execution().is_none());
        assert!(Context::new().loaded_relation("Post", &json!(1), "comments").is_none());

        let ctx = Context::for_execution(ExecutorConfig::default());
        let loaded = ctx.execution().unwrap().loaded();
        let approved = vec!["approved".to_string()];
        loaded.insert(ParentKey::new("Post", &json!(1)), "comments", &[], json!([{"id": 1}, {"id": 2}]));
        loaded.insert(ParentKey::new("Post", &json!(1)), "comments", &approved, json!([{"id": 2}]));

        assert_eq!(
            ctx.loaded_relation("Post", &json!(1), "comments"),
            Some(json!([{"id": 1}, {"id": 2}]))
        );
        assert_eq!(
            ctx.loaded_scoped_relation("Post", &json!(1), "comments", &approved),
            Some(json!([{"id": 2}]))
        );
        assert!(ctx.loaded_relation("Post", &json!(2), "comments").is_none());
    }

    #[test]
    fn test_field_error() {
        let error = FieldError::new("Something went wrong")
            .with_path(vec![
                PathSegment::Field("user".to_string()),
                PathSegment::Field("name".to_string()),
            ])
            .with_code("NOT_FOUND");

        assert_eq!(error.message, "Something went wrong");
        assert!(error.path.is_some());
        assert_eq!(error.code(), Some("NOT_FOUND"));
    }

    #[test]
    fn test_response_errors() {
        let ok = Response {
            data: Some(json!({"hello": "world"})),
            errors: None,
        };
        assert!(!ok.has_errors());
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"data": {"hello": "world"}}));

        let failed = Response {
            data: Some(json!({"hello": null})),
            errors: Some(vec![FieldError::new("Error")]),
        };
        assert!(failed.has_errors());
    }
}
