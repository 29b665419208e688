//! Fixture files.
//!
//! A fixture describes a complete in-memory application: models and their
//! rows, relation fields, scopes, root fields and executor settings.
//!
//! ```json
//! {
//!   "models": [
//!     { "name": "User", "relations": [
//!         { "name": "posts", "kind": "hasMany", "related": "Post", "localKey": "id", "foreignKey": "user_id" }
//!     ]},
//!     { "name": "Post" }
//!   ],
//!   "rows": { "User": [{ "id": 1 }], "Post": [{ "id": 1, "user_id": 1 }] },
//!   "roots": { "users": "User" },
//!   "fields": [{ "parentType": "User", "field": "posts" }]
//! }
//! ```

use eagerql_runtime::{
    Catalog, CatalogBuilder, ConfigurationError, Executor, ExecutorConfig, FnResolver, MemoryStore,
    ModelDef, PaginationType, PlanError, Predicate, QueryPlan, QueryPlanner, RelationDirective,
    RelationField, RelationSchema, ResolverMap, ScopeRegistry, Selection, WithRelation,
};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while loading a fixture or a query.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid JSON in `{path}`: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// A fixture file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    #[serde(default)]
    pub models: Vec<ModelDef>,
    /// Object types that are not models, such as custom edge types.
    #[serde(default)]
    pub object_types: Vec<String>,
    #[serde(default)]
    pub rows: IndexMap<String, Vec<Value>>,
    #[serde(default)]
    pub config: ExecutorConfig,
    /// Scopes as lists of predicates, keyed by scope name.
    #[serde(default)]
    pub scopes: IndexMap<String, Vec<Predicate>>,
    /// Root query fields returning every row of a model.
    #[serde(default)]
    pub roots: IndexMap<String, String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub with_relations: Vec<WithRelationDef>,
    /// Relations whose fetches fail.
    #[serde(default)]
    pub failing: Vec<String>,
}

/// A relation field on a parent type.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub parent_type: String,
    #[serde(flatten)]
    pub field: RelationField,
}

/// A field whose resolver runs after a relation of its parent is loaded.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithRelationDef {
    pub parent_type: String,
    pub field: String,
    pub relation: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Resolve to the number of related rows instead of the rows.
    #[serde(default)]
    pub count: bool,
}

/// A query file: a selection list, optionally named.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum QueryDocument {
    Named {
        #[serde(rename = "operationName")]
        operation_name: String,
        selections: Vec<Selection>,
    },
    Anonymous(Vec<Selection>),
}

impl QueryDocument {
    /// Reads a query file.
    pub fn load(path: &Path) -> Result<Self, FixtureError> {
        read_json(path)
    }

    fn into_parts(self) -> (Option<String>, Vec<Selection>) {
        match self {
            Self::Named {
                operation_name,
                selections,
            } => (Some(operation_name), selections),
            Self::Anonymous(selections) => (None, selections),
        }
    }
}

impl Fixture {
    /// Reads a fixture file.
    pub fn load(path: &Path) -> Result<Self, FixtureError> {
        read_json(path)
    }

    /// Builds the application the fixture describes.
    pub fn build(self) -> Result<App, FixtureError> {
        let catalog = Arc::new(
            self.object_types
                .into_iter()
                .fold(CatalogBuilder::new().models(self.models), CatalogBuilder::object_type)
                .build(),
        );

        let store = Arc::new(MemoryStore::new());
        for (model, rows) in self.rows {
            store.insert_many(model, rows);
        }
        for relation in self.failing {
            store.fail_relation(relation);
        }

        let mut scopes = ScopeRegistry::new();
        for (name, predicates) in self.scopes {
            scopes.register_predicates(name, predicates);
        }
        let schema = RelationSchema::new(Arc::clone(&catalog), store.clone()).with_scopes(scopes);

        let mut resolvers = ResolverMap::new();
        let mut field_types = Vec::new();

        for (field, model) in &self.roots {
            let rows = store.clone();
            let model_name = model.clone();
            resolvers.register_fn("Query", field, move |_parent, _args, _ctx, _info| {
                Ok(Value::Array(rows.all(&model_name)))
            });
            field_types.push(FieldType::new("Query", field, model));
        }

        for FieldDef { parent_type, field } in self.fields {
            match catalog.relation(&parent_type, field.relation_name()) {
                Ok(relation) => {
                    field_types.extend(relation_field_types(&parent_type, &field, &relation.related));
                }
                // Reported when the field is resolved
                Err(err) => warn!(parent = %parent_type, field = %field.field, "{err}"),
            }
            debug!(parent = %parent_type, field = %field.field, "registering relation field");
            let name = field.field.clone();
            resolvers.register(&parent_type, name, RelationDirective::new(field, schema.clone())?);
        }

        for def in self.with_relations {
            let primary_key = catalog.model(&def.parent_type)?.primary_key.clone();
            let (model, relation, count) = (def.parent_type.clone(), def.relation.clone(), def.count);
            let scopes = def.scopes.clone();
            resolvers.register(
                &def.parent_type,
                &def.field,
                FnResolver::new(move |parent, _args, ctx, _info| {
                    let loaded = parent
                        .get(&primary_key)
                        .and_then(|id| ctx.loaded_scoped_relation(&model, id, &relation, &scopes))
                        .unwrap_or(Value::Null);
                    if !count {
                        return Ok(loaded);
                    }
                    Ok(Value::from(match &loaded {
                        Value::Array(rows) => rows.len(),
                        Value::Null => 0,
                        _ => 1,
                    }))
                }),
            );
            let schema = schema.clone();
            resolvers.wrap(&def.parent_type, &def.field, move |inner| {
                WithRelation::new(inner, def.relation, schema).with_scopes(def.scopes)
            });
        }

        Ok(App {
            executor: Executor::new_with(self.config, resolvers),
            catalog,
            store,
            field_types,
        })
    }
}

/// A planner hint for an object-valued field that is not a plain relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldType {
    pub parent_type: String,
    pub field: String,
    pub return_type: String,
}

impl FieldType {
    fn new(parent_type: &str, field: &str, return_type: &str) -> Self {
        Self {
            parent_type: parent_type.to_string(),
            field: field.to_string(),
            return_type: return_type.to_string(),
        }
    }
}

/// Return types of a relation field and of the page types it may produce.
fn relation_field_types(parent_type: &str, field: &RelationField, related: &str) -> Vec<FieldType> {
    let name = &field.field;
    match field.pagination {
        None => vec![FieldType::new(parent_type, name, related)],
        Some(PaginationType::Paginator | PaginationType::Simple) => {
            let page = match field.pagination {
                Some(PaginationType::Simple) => format!("{related}SimplePaginator"),
                _ => format!("{related}Paginator"),
            };
            vec![
                FieldType::new(parent_type, name, &page),
                FieldType::new(&page, "data", related),
                FieldType::new(&page, "paginatorInfo", "PaginatorInfo"),
            ]
        }
        Some(PaginationType::Connection) => {
            let connection = format!("{related}Connection");
            let edge = field
                .edge_type
                .clone()
                .unwrap_or_else(|| format!("{related}Edge"));
            vec![
                FieldType::new(parent_type, name, &connection),
                FieldType::new(&connection, "edges", &edge),
                FieldType::new(&connection, "pageInfo", "PageInfo"),
                FieldType::new(&edge, "node", related),
            ]
        }
    }
}

/// An application built from a fixture.
#[derive(Debug)]
pub struct App {
    pub executor: Executor,
    pub catalog: Arc<Catalog>,
    pub store: Arc<MemoryStore>,
    pub field_types: Vec<FieldType>,
}

impl App {
    /// Plans a query document.
    pub fn plan(&self, document: QueryDocument) -> Result<QueryPlan, FixtureError> {
        let (operation_name, selections) = document.into_parts();
        let planner = self
            .field_types
            .iter()
            .fold(QueryPlanner::new(&self.catalog), |planner, ty| {
                planner.field_type(&ty.parent_type, &ty.field, &ty.return_type)
            });
        let plan = planner.plan(&selections)?;
        Ok(match operation_name {
            Some(name) => plan.with_operation_name(name),
            None => plan,
        })
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, FixtureError> {
    let source = std::fs::read_to_string(path).map_err(|source| FixtureError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&source).map_err(|source| FixtureError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use eagerql_runtime::Context;
    use serde_json::json;

    fn blog() -> Fixture {
        serde_json::from_value(json!({
            "models": [
                {"name": "User", "relations": [
                    {"name": "posts", "kind": "hasMany", "related": "Post",
                     "localKey": "id", "foreignKey": "user_id"}
                ]},
                {"name": "Post"}
            ],
            "rows": {
                "User": [{"id": 1}, {"id": 2}],
                "Post": [
                    {"id": 1, "user_id": 1, "draft": false},
                    {"id": 2, "user_id": 1, "draft": true},
                    {"id": 3, "user_id": 2, "draft": false}
                ]
            },
            "scopes": {"published": [{"column": "draft", "op": "eq", "value": false}]},
            "roots": {"users": "User"},
            "fields": [
                {"parentType": "User", "field": "posts"},
                {"parentType": "User", "field": "feed", "relation": "posts",
                 "scopes": ["published"], "type": "CONNECTION", "defaultCount": 5}
            ],
            "withRelations": [
                {"parentType": "User", "field": "postCount", "relation": "posts", "count": true}
            ]
        }))
        .unwrap()
    }

    fn query(value: serde_json::Value) -> QueryDocument {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_run_fixture() {
        let app = blog().build().unwrap();
        let plan = app
            .plan(query(json!([
                {"name": "users", "selections": [
                    {"name": "id"},
                    {"name": "postCount"},
                    {"name": "posts", "selections": [{"name": "id"}]}
                ]}
            ])))
            .unwrap();

        let (response, stats) = app.executor.run(&plan, &Context::new()).await;
        assert!(!response.has_errors());
        assert_eq!(stats.waves, 1);
        assert_eq!(app.store.fetch_count(), 2);
        assert_eq!(
            response.data.unwrap()["users"],
            json!([
                {"id": 1, "postCount": 2, "posts": [{"id": 1}, {"id": 2}]},
                {"id": 2, "postCount": 1, "posts": [{"id": 3}]}
            ])
        );
    }

    #[tokio::test]
    async fn test_connection_types_are_planned() {
        let app = blog().build().unwrap();
        let plan = app
            .plan(query(json!({
                "operationName": "Feed",
                "selections": [
                    {"name": "users", "selections": [
                        {"name": "feed", "selections": [
                            {"name": "edges", "selections": [
                                {"name": "node", "selections": [{"name": "id"}]}
                            ]},
                            {"name": "pageInfo", "selections": [{"name": "total"}]}
                        ]}
                    ]}
                ]
            })))
            .unwrap();
        assert_eq!(plan.operation_name.as_deref(), Some("Feed"));

        let response = app.executor.execute(&plan, &Context::new()).await;
        let data = response.data.unwrap();
        assert_eq!(data["users"][0]["feed"]["edges"], json!([{"node": {"id": 1}}]));
        assert_eq!(data["users"][0]["feed"]["pageInfo"]["total"], 1);
    }

    #[test]
    fn test_relation_field_types() {
        let field = RelationField::new("comments").paginate(PaginationType::Paginator);
        let types = relation_field_types("Post", &field, "Comment");
        assert_eq!(types[0], FieldType::new("Post", "comments", "CommentPaginator"));
        assert_eq!(types[1], FieldType::new("CommentPaginator", "data", "Comment"));
    }

    #[test]
    fn test_missing_file() {
        let err = Fixture::load(Path::new("does/not/exist.json")).unwrap_err();
        assert!(matches!(err, FixtureError::Io { .. }));
    }
}
