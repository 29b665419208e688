//! Relation directives.
//!
//! This module defines the resolvers that load model relations:
//! - [`RelationDirective`]: resolves a relation field, batched by default
//! - [`WithRelation`]: middleware that eager loads a relation before the
//!   wrapped resolver runs

use crate::catalog::Catalog;
use crate::dataloader::{BatchKey, RelationLoader};
use crate::error::ConfigurationError;
use crate::executor::{Context, ExecutorConfig};
use crate::pagination::{PaginationArgs, PaginationType};
use crate::resolver::{
    BoxedResolver, Resolver, ResolverArgs, ResolverError, ResolverFuture, ResolverInfo,
};
use crate::scope::{ArgumentFilter, ArgumentSet, BuilderDecorator, ScopeRegistry};
use crate::source::{Association, DataSource};
use crate::state::ExecutionState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Shared relation schema
// =============================================================================

/// Everything a relation resolver needs besides the execution: the model
/// catalog, the data source and the registered scopes.
#[derive(Clone)]
pub struct RelationSchema {
    catalog: Arc<Catalog>,
    source: Arc<dyn DataSource>,
    scopes: Arc<ScopeRegistry>,
}

impl RelationSchema {
    /// Creates a relation schema without scopes.
    pub fn new(catalog: Arc<Catalog>, source: Arc<dyn DataSource>) -> Self {
        Self {
            catalog,
            source,
            scopes: Arc::new(ScopeRegistry::new()),
        }
    }

    /// Sets the scope registry.
    pub fn with_scopes(mut self, scopes: ScopeRegistry) -> Self {
        self.scopes = Arc::new(scopes);
        self
    }

    /// The model catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The registered scopes.
    pub fn scopes(&self) -> &ScopeRegistry {
        &self.scopes
    }

    /// Resolves `relation` on `model`.
    pub fn association(&self, model: &str, relation: &str) -> Result<Association, ConfigurationError> {
        Association::resolve(&self.catalog, Arc::clone(&self.source), model, relation)
    }
}

impl fmt::Debug for RelationSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationSchema")
            .field("models", &self.catalog.models().count())
            .field("scopes", &self.scopes)
            .finish()
    }
}

// =============================================================================
// Relation fields
// =============================================================================

/// Arguments of a relation field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationField {
    /// The field name.
    pub field: String,

    /// The relation to load. Defaults to the field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,

    /// Scopes applied to the relation query, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,

    /// Argument filters applied before the scopes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<ArgumentFilter>,

    /// Pagination type. Unpaginated when unset.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationType>,

    /// Page size when the query gives none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_count: Option<usize>,

    /// Upper bound for requested page sizes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<usize>,

    /// Custom edge type of a connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_type: Option<String>,
}

impl RelationField {
    /// Creates a relation field loading the relation of the same name.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            relation: None,
            scopes: Vec::new(),
            filters: Vec::new(),
            pagination: None,
            default_count: None,
            max_count: None,
            edge_type: None,
        }
    }

    /// Sets the relation name.
    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    /// Adds a scope.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    /// Adds an argument filter.
    pub fn with_filter(mut self, filter: ArgumentFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Paginates the field.
    pub fn paginate(mut self, kind: PaginationType) -> Self {
        self.pagination = Some(kind);
        self
    }

    /// Sets the default page size.
    pub fn with_default_count(mut self, count: usize) -> Self {
        self.default_count = Some(count);
        self
    }

    /// Sets the maximum page size.
    pub fn with_max_count(mut self, count: usize) -> Self {
        self.max_count = Some(count);
        self
    }

    /// Sets the edge type.
    pub fn with_edge_type(mut self, edge_type: impl Into<String>) -> Self {
        self.edge_type = Some(edge_type.into());
        self
    }

    /// The relation this field loads.
    pub fn relation_name(&self) -> &str {
        self.relation.as_deref().unwrap_or(&self.field)
    }

    fn pagination_args(
        &self,
        args: &ArgumentSet,
        config: &ExecutorConfig,
    ) -> Result<Option<PaginationArgs>, ConfigurationError> {
        let Some(kind) = self.pagination else {
            return Ok(None);
        };
        PaginationArgs::extract(
            args,
            kind,
            &self.field,
            self.default_count.or(config.pagination.default_count),
            self.max_count.or(config.pagination.max_count),
        )
        .map(Some)
    }
}

/// Resolver of a relation field.
///
/// In batched mode the parent is registered with the batch loader for the
/// field's position and the resolver waits for the wave to end; otherwise the
/// relation is loaded for this parent alone.
#[derive(Debug)]
pub struct RelationDirective {
    field: RelationField,
    schema: RelationSchema,
}

impl RelationDirective {
    /// Creates the resolver, validating the field arguments.
    pub fn new(field: RelationField, schema: RelationSchema) -> Result<Self, ConfigurationError> {
        if let Some(edge_type) = &field.edge_type {
            if !schema.catalog().has_type(edge_type) {
                return Err(ConfigurationError::UnknownEdgeType {
                    field: field.field.clone(),
                    edge_type: edge_type.clone(),
                });
            }
        }
        Ok(Self { field, schema })
    }

    /// The field arguments.
    pub fn field(&self) -> &RelationField {
        &self.field
    }

    async fn load(
        &self,
        parent: &Value,
        args: &ResolverArgs,
        ctx: &Context,
        info: &ResolverInfo,
    ) -> Result<Value, ResolverError> {
        let execution = current_execution(ctx)?;
        let relation = self.field.relation_name();
        let (model, discriminator) = concrete_model(parent, info);
        let association = self.schema.association(model, relation)?;

        let arguments = ArgumentSet::from(args);
        let decorate = BuilderDecorator::for_field(
            arguments.clone(),
            &self.field.filters,
            &self.field.scopes,
            self.schema.scopes(),
        )?;

        let strategy = match self.field.pagination_args(&arguments, execution.config())? {
            Some(_) if !association.relation().kind.is_to_many() => {
                return Err(ConfigurationError::NotPaginatable {
                    model: association.model().to_string(),
                    relation: relation.to_string(),
                }
                .into());
            }
            Some(pagination) => RelationLoader::paginated(decorate, pagination),
            None => RelationLoader::simple(decorate),
        };

        if !execution.batchload_relations() {
            return Ok(strategy.load_one(&association, parent).await?);
        }

        let mut key = BatchKey::new(relation, &info.path, &self.field.scopes, &arguments);
        if let Some(type_name) = discriminator {
            key = key.with_parent_type(type_name);
        }
        let loader = execution.registry().instance(key);
        loader.attach_strategy(association, strategy)?;
        Ok(loader.load(parent)?.await?)
    }
}

impl Resolver for RelationDirective {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        Box::pin(self.load(parent, args, ctx, info))
    }
}

// =============================================================================
// Eager-load middleware
// =============================================================================

/// Loads a relation of the parent before running the wrapped resolver.
///
/// The relation is not part of the field's output; the wrapped resolver reads
/// it with [`Context::loaded_relation`]. Loading always goes through the batch
/// loader, whatever the batching setting.
pub struct WithRelation {
    inner: BoxedResolver,
    relation: String,
    scopes: Vec<String>,
    schema: RelationSchema,
}

impl WithRelation {
    /// Wraps `inner` so that `relation` is loaded first.
    pub fn new(inner: BoxedResolver, relation: impl Into<String>, schema: RelationSchema) -> Self {
        Self {
            inner,
            relation: relation.into(),
            scopes: Vec::new(),
            schema,
        }
    }

    /// Sets the scopes applied to the relation query.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    async fn load_then_resolve(
        &self,
        parent: &Value,
        args: &ResolverArgs,
        ctx: &Context,
        info: &ResolverInfo,
    ) -> Result<Value, ResolverError> {
        let execution = current_execution(ctx)?;
        let (model, discriminator) = concrete_model(parent, info);
        let association = self.schema.association(model, &self.relation)?;

        let arguments = ArgumentSet::from(args);
        let decorate =
            BuilderDecorator::for_field(arguments.clone(), &[], &self.scopes, self.schema.scopes())?;

        let mut key = BatchKey::new(&self.relation, &info.path, &self.scopes, &arguments).eager_load();
        if let Some(type_name) = discriminator {
            key = key.with_parent_type(type_name);
        }
        let loader = execution.registry().instance(key);
        loader.attach_strategy(association, RelationLoader::simple(decorate))?;
        loader.load(parent)?.await?;

        self.inner.resolve(parent, args, ctx, info).await
    }
}

impl Resolver for WithRelation {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        Box::pin(self.load_then_resolve(parent, args, ctx, info))
    }
}

impl fmt::Debug for WithRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WithRelation")
            .field("relation", &self.relation)
            .field("scopes", &self.scopes)
            .finish()
    }
}

fn current_execution(ctx: &Context) -> Result<&ExecutionState, ResolverError> {
    ctx.execution().ok_or_else(|| {
        ResolverError::Internal("relations can only be loaded during an execution".to_string())
    })
}

/// The model of `parent`, and the discriminator to add to its batch key when
/// it differs from the declared parent type.
fn concrete_model<'v>(parent: &'v Value, info: &'v ResolverInfo) -> (&'v str, Option<&'v str>) {
    match parent.get("__typename").and_then(Value::as_str) {
        Some(type_name) if type_name != info.parent_type => (type_name, Some(type_name)),
        _ => (info.parent_type.as_str(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogBuilder, ModelDef, RelationDef};
    use crate::executor::PathSegment;
    use crate::memory::MemoryStore;
    use serde_json::json;

    fn schema() -> RelationSchema {
        let catalog = CatalogBuilder::new()
            .model(ModelDef::new("Post").relation(RelationDef::has_many("comments", "Comment", "post_id")))
            .model(ModelDef::new("Comment").relation(RelationDef::belongs_to("post", "Post", "post_id")))
            .object_type("CommentEdge")
            .build();
        let store = MemoryStore::new().with_rows(
            "Comment",
            vec![
                json!({"id": 1, "post_id": 1, "body": "first"}),
                json!({"id": 2, "post_id": 1, "body": "second"}),
            ],
        );
        RelationSchema::new(Arc::new(catalog), Arc::new(store))
    }

    fn info(field: &str, parent_type: &str) -> ResolverInfo {
        ResolverInfo::new(field, parent_type).with_path(vec![
            PathSegment::Field("posts".into()),
            PathSegment::Index(0),
            PathSegment::Field(field.into()),
        ])
    }

    #[test]
    fn test_relation_field_deserialize() {
        let field: RelationField = serde_json::from_value(json!({
            "field": "latestComments",
            "relation": "comments",
            "scopes": ["onlyApproved"],
            "filters": [{"argument": "author", "column": "user_id"}],
            "type": "CONNECTION",
            "maxCount": 20
        }))
        .unwrap();

        assert_eq!(field.relation_name(), "comments");
        assert_eq!(field.pagination, Some(PaginationType::Connection));
        assert_eq!(field.max_count, Some(20));
        assert_eq!(field.filters[0], ArgumentFilter::new("author", "user_id", crate::source::Operator::Eq));
        assert_eq!(RelationField::new("comments").relation_name(), "comments");
    }

    #[test]
    fn test_edge_type_must_exist() {
        let ok = RelationField::new("comments")
            .paginate(PaginationType::Connection)
            .with_edge_type("CommentEdge");
        assert!(RelationDirective::new(ok, schema()).is_ok());

        let missing = RelationField::new("comments").with_edge_type("Nope");
        let err = RelationDirective::new(missing, schema()).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownEdgeType {
                field: "comments".into(),
                edge_type: "Nope".into()
            }
        );
    }

    #[test]
    fn test_concrete_model() {
        let info = info("comments", "FeedItem");
        assert_eq!(concrete_model(&json!({"id": 1}), &info), ("FeedItem", None));
        assert_eq!(
            concrete_model(&json!({"id": 1, "__typename": "Post"}), &info),
            ("Post", Some("Post"))
        );
        assert_eq!(
            concrete_model(&json!({"id": 1, "__typename": "FeedItem"}), &info),
            ("FeedItem", None)
        );
    }

    #[tokio::test]
    async fn test_relation_requires_execution() {
        let directive = RelationDirective::new(RelationField::new("comments"), schema()).unwrap();
        let err = directive
            .resolve(&json!({"id": 1}), &ResolverArgs::new(), &Context::new(), &info("comments", "Post"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::Internal(_)));
    }

    #[tokio::test]
    async fn test_direct_mode() {
        let directive = RelationDirective::new(RelationField::new("comments"), schema()).unwrap();
        let ctx = Context::for_execution(ExecutorConfig {
            batchload_relations: false,
            ..ExecutorConfig::default()
        });

        let value = directive
            .resolve(&json!({"id": 1}), &ResolverArgs::new(), &ctx, &info("comments", "Post"))
            .await
            .unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(2));
        assert!(ctx.execution().unwrap().registry().is_empty());
    }

    #[tokio::test]
    async fn test_paginated_to_one_is_rejected() {
        let field = RelationField::new("post").paginate(PaginationType::Paginator);
        let directive = RelationDirective::new(field, schema()).unwrap();
        let ctx = Context::for_execution(ExecutorConfig::default());

        let err = directive
            .resolve(&json!({"id": 1, "post_id": 1}), &ResolverArgs::new(), &ctx, &info("post", "Comment"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("CONFIGURATION_ERROR"));
        assert!(ctx.execution().unwrap().registry().is_empty());
    }
}
