//! Model catalog.
//!
//! The catalog describes which models exist, what their primary key is and
//! which relations each of them declares. Relation lookup by name is checked:
//! an unknown model or relation is a [`ConfigurationError`], never a panic.

use crate::error::ConfigurationError;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// The cardinality and direction of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    /// The parent owns many related rows (`related.foreign_key = parent.local_key`).
    HasMany,
    /// The parent owns at most one related row.
    HasOne,
    /// The parent points at one related row (`related.foreign_key = parent.local_key`,
    /// where `local_key` is the parent's foreign key column).
    BelongsTo,
}

impl RelationKind {
    /// Returns true if the relation yields a list.
    pub const fn is_to_many(&self) -> bool {
        matches!(self, Self::HasMany)
    }
}

/// A relation declared on a model.
///
/// Rows are joined on `parent[local_key] == related[foreign_key]`, which
/// covers both owning and owned sides.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDef {
    /// Relation name, as referenced by fields.
    pub name: String,
    /// Relation kind.
    pub kind: RelationKind,
    /// Related model name.
    pub related: String,
    /// Column on the parent holding the join value.
    pub local_key: String,
    /// Column on the related model matched against the join value.
    pub foreign_key: String,
}

impl RelationDef {
    /// A has-many relation joined on `parent.id = related.<foreign_key>`.
    pub fn has_many(
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::HasMany,
            related: related.into(),
            local_key: "id".to_string(),
            foreign_key: foreign_key.into(),
        }
    }

    /// A has-one relation joined on `parent.id = related.<foreign_key>`.
    pub fn has_one(
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            kind: RelationKind::HasOne,
            ..Self::has_many(name, related, foreign_key)
        }
    }

    /// A belongs-to relation joined on `parent.<local_key> = related.id`.
    pub fn belongs_to(
        name: impl Into<String>,
        related: impl Into<String>,
        local_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::BelongsTo,
            related: related.into(),
            local_key: local_key.into(),
            foreign_key: "id".to_string(),
        }
    }

    /// Overrides the local key column.
    pub fn with_local_key(mut self, column: impl Into<String>) -> Self {
        self.local_key = column.into();
        self
    }
}

fn default_primary_key() -> String {
    "id".to_string()
}

/// A model definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDef {
    /// Model name, matching the graph type name.
    pub name: String,
    /// Primary key column.
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// Relations keyed by name.
    #[serde(default, with = "relation_list")]
    pub relations: IndexMap<String, RelationDef>,
}

impl ModelDef {
    /// Creates a model with an `id` primary key and no relations.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: default_primary_key(),
            relations: IndexMap::new(),
        }
    }

    /// Sets the primary key column.
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Declares a relation.
    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.insert(relation.name.clone(), relation);
        self
    }

    /// Looks up a relation by name.
    pub fn get_relation(&self, name: &str) -> Result<&RelationDef, ConfigurationError> {
        self.relations
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownRelation {
                model: self.name.clone(),
                relation: name.to_string(),
            })
    }
}

/// Relations are written as a list in fixtures and stored keyed by name.
mod relation_list {
    use super::RelationDef;
    use indexmap::IndexMap;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        relations: &IndexMap<String, RelationDef>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(relations.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<IndexMap<String, RelationDef>, D::Error> {
        let list = Vec::<RelationDef>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|r| (r.name.clone(), r)).collect())
    }
}

/// The set of known models.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    models: IndexMap<String, ModelDef>,
    object_types: FxHashSet<String>,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a model by name.
    pub fn model(&self, name: &str) -> Result<&ModelDef, ConfigurationError> {
        self.models
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownModel(name.to_string()))
    }

    /// Looks up `relation` on `model`.
    pub fn relation(&self, model: &str, relation: &str) -> Result<&RelationDef, ConfigurationError> {
        self.model(model)?.get_relation(relation)
    }

    /// Returns true if `name` is a model or a declared object type.
    pub fn has_type(&self, name: &str) -> bool {
        self.models.contains_key(name) || self.object_types.contains(name)
    }

    /// Returns all models.
    pub fn models(&self) -> impl Iterator<Item = &ModelDef> {
        self.models.values()
    }
}

/// Catalog builder.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    catalog: Catalog,
}

impl CatalogBuilder {
    /// Creates a new catalog builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a model.
    pub fn model(mut self, model: ModelDef) -> Self {
        self.catalog.models.insert(model.name.clone(), model);
        self
    }

    /// Adds several models.
    pub fn models(mut self, models: impl IntoIterator<Item = ModelDef>) -> Self {
        for model in models {
            self = self.model(model);
        }
        self
    }

    /// Declares a non-model object type, such as a custom edge type.
    pub fn object_type(mut self, name: impl Into<String>) -> Self {
        self.catalog.object_types.insert(name.into());
        self
    }

    /// Builds the catalog.
    pub fn build(self) -> Catalog {
        self.catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blog_catalog() -> Catalog {
        CatalogBuilder::new()
            .model(
                ModelDef::new("User")
                    .relation(RelationDef::has_many("posts", "Post", "user_id"))
                    .relation(RelationDef::has_one("profile", "Profile", "user_id")),
            )
            .model(ModelDef::new("Post").relation(RelationDef::belongs_to("author", "User", "user_id")))
            .object_type("PostEdge")
            .build()
    }

    #[test]
    fn test_relation_lookup() {
        let catalog = blog_catalog();

        let posts = catalog.relation("User", "posts").unwrap();
        assert_eq!(posts.related, "Post");
        assert_eq!(posts.local_key, "id");
        assert_eq!(posts.foreign_key, "user_id");
        assert!(posts.kind.is_to_many());

        let author = catalog.relation("Post", "author").unwrap();
        assert_eq!(author.local_key, "user_id");
        assert_eq!(author.foreign_key, "id");
        assert!(!author.kind.is_to_many());
    }

    #[test]
    fn test_unknown_lookups() {
        let catalog = blog_catalog();

        assert_eq!(
            catalog.relation("User", "friends").unwrap_err(),
            ConfigurationError::UnknownRelation {
                model: "User".into(),
                relation: "friends".into(),
            }
        );
        assert_eq!(
            catalog.model("Comment").unwrap_err(),
            ConfigurationError::UnknownModel("Comment".into())
        );
    }

    #[test]
    fn test_has_type() {
        let catalog = blog_catalog();
        assert!(catalog.has_type("User"));
        assert!(catalog.has_type("PostEdge"));
        assert!(!catalog.has_type("CommentEdge"));
    }

    #[test]
    fn test_model_from_json() {
        let model: ModelDef = serde_json::from_value(serde_json::json!({
            "name": "User",
            "relations": [
                {"name": "posts", "kind": "hasMany", "related": "Post", "localKey": "id", "foreignKey": "user_id"}
            ]
        }))
        .unwrap();

        assert_eq!(model.primary_key, "id");
        assert_eq!(model.get_relation("posts").unwrap().kind, RelationKind::HasMany);
    }
}
