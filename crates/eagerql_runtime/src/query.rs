//! Query plans.
//!
//! A [`QueryPlan`] is a tree of [`PlanNode`]s the executor walks. Plans are
//! usually produced by [`QueryPlanner`] from a JSON selection tree:
//!
//! ```json
//! [
//!   { "name": "posts", "selections": [
//!       { "name": "title" },
//!       { "name": "comments", "arguments": { "first": 2 }, "selections": [{ "name": "body" }] }
//!   ]}
//! ]
//! ```

use crate::catalog::Catalog;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A query plan.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// The root node of the plan.
    pub root: PlanNode,
    /// The operation name, if any.
    pub operation_name: Option<String>,
}

impl QueryPlan {
    /// Creates a plan from its root node.
    pub fn new(root: PlanNode) -> Self {
        Self {
            root,
            operation_name: None,
        }
    }

    /// Sets the operation name.
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}

/// A node in the query plan.
#[derive(Debug, Clone)]
pub enum PlanNode {
    /// Concurrent execution within the current wave.
    Parallel(Vec<PlanNode>),
    /// A field with a sub-selection.
    Field {
        info: FieldInfo,
        response_name: String,
        children: Box<PlanNode>,
    },
    /// A leaf field to resolve.
    Leaf { field: FieldInfo },
    /// A selection that applies only to parents of one concrete type.
    TypeCondition {
        type_name: String,
        node: Box<PlanNode>,
    },
}

/// Information about a field being planned.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    /// The field name.
    pub name: String,
    /// The alias, if any.
    pub alias: Option<String>,
    /// The type the field is declared on.
    pub parent_type: String,
    /// The field's named return type.
    pub return_type: String,
    /// Field arguments in query order.
    pub arguments: Vec<(String, Value)>,
    /// Whether this is an introspection field (`__typename`).
    pub is_introspection: bool,
}

impl FieldInfo {
    /// Creates field info.
    pub fn new(
        name: impl Into<String>,
        parent_type: impl Into<String>,
        return_type: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            is_introspection: name.starts_with("__"),
            name,
            alias: None,
            parent_type: parent_type.into(),
            return_type: return_type.into(),
            arguments: Vec::new(),
        }
    }

    /// Sets the alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Adds an argument.
    pub fn with_argument(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.push((name.into(), value));
        self
    }

    /// The key under which the field appears in the response.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A node of a JSON selection tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selection {
    /// An inline fragment on a concrete type.
    Fragment {
        on: String,
        selections: Vec<Selection>,
    },
    /// A field.
    Field(FieldSelection),
}

/// A selected field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSelection {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub arguments: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selections: Vec<Selection>,
}

/// A planning error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// A field with a sub-selection has no known return type.
    #[error("cannot select sub-fields of `{parent_type}.{field}`: its type is unknown")]
    UnknownFieldType { parent_type: String, field: String },
    /// An empty selection set.
    #[error("selection on `{0}` is empty")]
    EmptySelection(String),
}

/// Builds plans from selection trees.
///
/// Return types of relation fields come from the catalog; other object-valued
/// fields must be declared with [`QueryPlanner::field_type`].
#[derive(Debug)]
pub struct QueryPlanner<'a> {
    catalog: &'a Catalog,
    root_type: String,
    field_types: FxHashMap<(String, String), String>,
}

impl<'a> QueryPlanner<'a> {
    /// Creates a planner whose root type is `Query`.
    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            root_type: "Query".to_string(),
            field_types: FxHashMap::default(),
        }
    }

    /// Sets the root type name.
    pub fn root_type(mut self, name: impl Into<String>) -> Self {
        self.root_type = name.into();
        self
    }

    /// Declares the return type of a non-relation field.
    pub fn field_type(
        mut self,
        parent_type: impl Into<String>,
        field: impl Into<String>,
        return_type: impl Into<String>,
    ) -> Self {
        self.field_types
            .insert((parent_type.into(), field.into()), return_type.into());
        self
    }

    /// Plans a selection set on the root type.
    pub fn plan(&self, selections: &[Selection]) -> Result<QueryPlan, PlanError> {
        let root = self.plan_selections(&self.root_type, selections)?;
        Ok(QueryPlan::new(root))
    }

    fn plan_selections(
        &self,
        parent_type: &str,
        selections: &[Selection],
    ) -> Result<PlanNode, PlanError> {
        if selections.is_empty() {
            return Err(PlanError::EmptySelection(parent_type.to_string()));
        }
        let nodes = selections
            .iter()
            .map(|selection| self.plan_selection(parent_type, selection))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PlanNode::Parallel(nodes))
    }

    fn plan_selection(&self, parent_type: &str, selection: &Selection) -> Result<PlanNode, PlanError> {
        match selection {
            Selection::Fragment { on, selections } => Ok(PlanNode::TypeCondition {
                type_name: on.clone(),
                node: Box::new(self.plan_selections(on, selections)?),
            }),
            Selection::Field(field) => self.plan_field(parent_type, field),
        }
    }

    fn plan_field(&self, parent_type: &str, field: &FieldSelection) -> Result<PlanNode, PlanError> {
        let return_type = self.return_type(parent_type, &field.name);
        let mut info = FieldInfo::new(
            &field.name,
            parent_type,
            return_type.clone().unwrap_or_default(),
        );
        if let Some(alias) = &field.alias {
            info = info.with_alias(alias);
        }
        for (name, value) in &field.arguments {
            info = info.with_argument(name, value.clone());
        }

        if field.selections.is_empty() {
            return Ok(PlanNode::Leaf { field: info });
        }

        let return_type = return_type.ok_or_else(|| PlanError::UnknownFieldType {
            parent_type: parent_type.to_string(),
            field: field.name.clone(),
        })?;
        let children = self.plan_selections(&return_type, &field.selections)?;
        Ok(PlanNode::Field {
            response_name: info.response_key().to_string(),
            info,
            children: Box::new(children),
        })
    }

    fn return_type(&self, parent_type: &str, field: &str) -> Option<String> {
        if let Some(ty) = self
            .field_types
            .get(&(parent_type.to_string(), field.to_string()))
        {
            return Some(ty.clone());
        }
        self.catalog
            .relation(parent_type, field)
            .ok()
            .map(|relation| relation.related.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogBuilder, ModelDef, RelationDef};
    use serde_json::json;

    fn catalog() -> Catalog {
        CatalogBuilder::new()
            .model(ModelDef::new("Post").relation(RelationDef::has_many("comments", "Comment", "post_id")))
            .model(ModelDef::new("Comment"))
            .build()
    }

    #[test]
    fn test_plan_from_selection_tree() {
        let catalog = catalog();
        let selections: Vec<Selection> = serde_json::from_value(json!([
            {"name": "posts", "selections": [
                {"name": "title"},
                {"name": "comments", "alias": "top", "arguments": {"first": 2}, "selections": [
                    {"name": "body"}
                ]}
            ]}
        ]))
        .unwrap();

        let plan = QueryPlanner::new(&catalog)
            .field_type("Query", "posts", "Post")
            .plan(&selections)
            .unwrap();

        let PlanNode::Parallel(roots) = &plan.root else {
            panic!("expected parallel root");
        };
        let PlanNode::Field { info, children, .. } = &roots[0] else {
            panic!("expected posts field");
        };
        assert_eq!(info.return_type, "Post");

        let PlanNode::Parallel(fields) = children.as_ref() else {
            panic!("expected parallel children");
        };
        let PlanNode::Field {
            info,
            response_name,
            ..
        } = &fields[1]
        else {
            panic!("expected comments field");
        };
        assert_eq!(response_name, "top");
        assert_eq!(info.parent_type, "Post");
        assert_eq!(info.return_type, "Comment");
        assert_eq!(info.arguments, vec![("first".to_string(), json!(2))]);
    }

    #[test]
    fn test_fragments_and_typename() {
        let catalog = catalog();
        let selections: Vec<Selection> = serde_json::from_value(json!([
            {"on": "Post", "selections": [{"name": "__typename"}]}
        ]))
        .unwrap();

        let plan = QueryPlanner::new(&catalog).plan(&selections).unwrap();
        let PlanNode::Parallel(nodes) = &plan.root else {
            panic!("expected parallel root");
        };
        let PlanNode::TypeCondition { type_name, node } = &nodes[0] else {
            panic!("expected type condition");
        };
        assert_eq!(type_name, "Post");
        let PlanNode::Parallel(leaves) = node.as_ref() else {
            panic!("expected parallel children");
        };
        assert!(matches!(&leaves[0], PlanNode::Leaf { field } if field.is_introspection));
    }

    #[test]
    fn test_unknown_object_field() {
        let catalog = catalog();
        let selections: Vec<Selection> = serde_json::from_value(json!([
            {"name": "viewer", "selections": [{"name": "id"}]}
        ]))
        .unwrap();

        let err = QueryPlanner::new(&catalog).plan(&selections).unwrap_err();
        assert_eq!(
            err,
            PlanError::UnknownFieldType {
                parent_type: "Query".into(),
                field: "viewer".into()
            }
        );
    }

    #[test]
    fn test_response_key() {
        let field = FieldInfo::new("comments", "Post", "Comment");
        assert_eq!(field.response_key(), "comments");
        assert_eq!(field.with_alias("recent").response_key(), "recent");
    }
}
