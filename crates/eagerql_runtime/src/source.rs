//! Persistence-layer interface.
//!
//! A [`DataSource`] performs one bulk eager fetch for a set of owner keys,
//! filtered and sorted by a [`RelationQuery`]. The query is a plain value that
//! resolvers decorate before it is handed to the source, so predicates from
//! scopes and arguments are in place before any slicing happens.

use crate::catalog::{Catalog, RelationDef};
use crate::dataloader::key::{canonical_json, ParentKey};
use crate::error::{ConfigurationError, SourceError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    IsNull,
    NotNull,
}

/// A single `column <op> value` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    #[serde(rename = "op")]
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

impl Predicate {
    /// Creates a new predicate.
    pub fn new(column: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
        }
    }

    /// Evaluates the predicate against a row.
    pub fn matches(&self, row: &Value) -> bool {
        let field = row.get(&self.column).unwrap_or(&Value::Null);
        match self.operator {
            Operator::Eq => values_equal(field, &self.value),
            Operator::Ne => !values_equal(field, &self.value),
            Operator::Gt => compare_values(field, &self.value) == Some(Ordering::Greater),
            Operator::Gte => matches!(
                compare_values(field, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Lt => compare_values(field, &self.value) == Some(Ordering::Less),
            Operator::Lte => matches!(
                compare_values(field, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::In => match &self.value {
                Value::Array(items) => items.iter().any(|item| values_equal(field, item)),
                other => values_equal(field, other),
            },
            Operator::IsNull => field.is_null(),
            Operator::NotNull => !field.is_null(),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// A sort clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub order: SortOrder,
}

/// The decoratable part of a relation fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationQuery {
    predicates: Vec<Predicate>,
    order_by: Vec<OrderBy>,
}

impl RelationQuery {
    /// Creates an undecorated query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a predicate.
    pub fn filter(&mut self, predicate: Predicate) -> &mut Self {
        self.predicates.push(predicate);
        self
    }

    /// Adds a `column = value` predicate.
    pub fn where_eq(&mut self, column: impl Into<String>, value: Value) -> &mut Self {
        self.filter(Predicate::new(column, Operator::Eq, value))
    }

    /// Adds a sort clause.
    pub fn order_by(&mut self, column: impl Into<String>, order: SortOrder) -> &mut Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            order,
        });
        self
    }

    /// Returns the predicates.
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Returns the sort clauses.
    pub fn sort_clauses(&self) -> &[OrderBy] {
        &self.order_by
    }

    /// Returns true if `row` satisfies every predicate.
    pub fn matches(&self, row: &Value) -> bool {
        self.predicates.iter().all(|p| p.matches(row))
    }

    /// Sorts rows in place by the sort clauses. The sort is stable.
    pub fn sort(&self, rows: &mut [Value]) {
        if self.order_by.is_empty() {
            return;
        }
        rows.sort_by(|a, b| {
            for clause in &self.order_by {
                let left = a.get(&clause.column).unwrap_or(&Value::Null);
                let right = b.get(&clause.column).unwrap_or(&Value::Null);
                let ordering = compare_values(left, right).unwrap_or(Ordering::Equal);
                let ordering = match clause.order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }
}

/// Compares two JSON scalars. Numbers compare numerically.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b).map_or_else(|| a == b, |o| o == Ordering::Equal)
}

/// The persistence layer.
pub trait DataSource: Send + Sync {
    /// Fetches every row of `relation.related` whose `relation.foreign_key`
    /// equals one of `owner_keys` and which satisfies `query`, sorted by
    /// `query`, in a single round trip.
    fn eager_load<'a>(
        &'a self,
        relation: &'a RelationDef,
        owner_keys: &'a [Value],
        query: &'a RelationQuery,
    ) -> BoxFuture<'a, Result<Vec<Value>, SourceError>>;
}

/// A relation resolved against a concrete parent model, bound to the source
/// that can fetch it.
#[derive(Clone)]
pub struct Association {
    model: String,
    primary_key: String,
    relation: RelationDef,
    source: Arc<dyn DataSource>,
}

impl Association {
    /// Resolves `relation` on `model`.
    pub fn resolve(
        catalog: &Catalog,
        source: Arc<dyn DataSource>,
        model: &str,
        relation: &str,
    ) -> Result<Self, ConfigurationError> {
        let model_def = catalog.model(model)?;
        let relation = model_def.get_relation(relation)?.clone();
        Ok(Self {
            model: model_def.name.clone(),
            primary_key: model_def.primary_key.clone(),
            relation,
            source,
        })
    }

    /// The parent model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The relation definition.
    pub fn relation(&self) -> &RelationDef {
        &self.relation
    }

    /// Returns true if both handles describe the same relation of the same model.
    pub fn same_target(&self, other: &Association) -> bool {
        self.model == other.model && self.relation == other.relation
    }

    /// Identifies `parent` by its primary key.
    pub fn parent_key(&self, parent: &Value) -> Result<ParentKey, ConfigurationError> {
        match parent.get(&self.primary_key) {
            Some(id) if !id.is_null() => Ok(ParentKey::new(&self.model, id)),
            _ => Err(ConfigurationError::MissingParentKey {
                model: self.model.clone(),
                key: self.primary_key.clone(),
            }),
        }
    }

    /// The value `parent` joins on, if any.
    pub fn join_value<'v>(&self, parent: &'v Value) -> Option<&'v Value> {
        parent
            .get(&self.relation.local_key)
            .filter(|value| !value.is_null())
    }

    /// The join value of a related row, in canonical form.
    pub fn related_join_key(&self, row: &Value) -> Option<String> {
        row.get(&self.relation.foreign_key)
            .filter(|value| !value.is_null())
            .map(canonical_json)
    }

    /// Runs the bulk fetch.
    pub async fn fetch(
        &self,
        owner_keys: &[Value],
        query: &RelationQuery,
    ) -> Result<Vec<Value>, SourceError> {
        self.source.eager_load(&self.relation, owner_keys, query).await
    }
}

impl fmt::Debug for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Association")
            .field("model", &self.model)
            .field("relation", &self.relation.name)
            .field("related", &self.relation.related)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_predicate_matching() {
        let row = json!({"id": 1, "approved": true, "score": 7, "title": "hello"});

        assert!(Predicate::new("approved", Operator::Eq, json!(true)).matches(&row));
        assert!(Predicate::new("score", Operator::Gt, json!(5)).matches(&row));
        assert!(Predicate::new("score", Operator::Lte, json!(7.0)).matches(&row));
        assert!(!Predicate::new("score", Operator::Lt, json!(7)).matches(&row));
        assert!(Predicate::new("title", Operator::In, json!(["hello", "world"])).matches(&row));
        assert!(Predicate::new("missing", Operator::IsNull, Value::Null).matches(&row));
        assert!(Predicate::new("title", Operator::Ne, json!("bye")).matches(&row));
    }

    #[test]
    fn test_query_sort() {
        let mut query = RelationQuery::new();
        query
            .order_by("rank", SortOrder::Desc)
            .order_by("id", SortOrder::Asc);

        let mut rows = vec![
            json!({"id": 1, "rank": 1}),
            json!({"id": 3, "rank": 2}),
            json!({"id": 2, "rank": 2}),
        ];
        query.sort(&mut rows);

        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn test_query_matches_all_predicates() {
        let mut query = RelationQuery::new();
        query.where_eq("approved", json!(true)).where_eq("post_id", json!(1));

        assert!(query.matches(&json!({"approved": true, "post_id": 1})));
        assert!(!query.matches(&json!({"approved": false, "post_id": 1})));
        assert_eq!(query.predicates().len(), 2);
    }

    #[test]
    fn test_predicate_from_json() {
        let predicate: Predicate =
            serde_json::from_value(json!({"column": "approved", "op": "eq", "value": true})).unwrap();
        assert_eq!(predicate.operator, Operator::Eq);
    }
}
