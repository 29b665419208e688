//! How a relation is loaded for a set of parents.

use super::key::canonical_json;
use crate::error::LoaderResult;
use crate::pagination::PaginationArgs;
use crate::scope::BuilderDecorator;
use crate::source::{Association, RelationQuery};
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use std::fmt;

/// Loading strategy of a relation batch.
///
/// Direct and batched resolution both go through [`RelationLoader::load`], so
/// a field yields the same value whichever mode is active.
#[derive(Debug, Clone)]
pub enum RelationLoader {
    /// The whole relation, decorated.
    Simple { decorate: BuilderDecorator },
    /// One page of the relation per parent.
    Paginated {
        decorate: BuilderDecorator,
        pagination: PaginationArgs,
    },
}

/// The comparable part of a [`RelationLoader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderShape {
    Simple,
    Paginated(PaginationArgs),
}

impl fmt::Display for LoaderShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple => f.write_str("simple"),
            Self::Paginated(args) => write!(
                f,
                "paginated ({}, first {}, offset {})",
                args.kind.as_str(),
                args.first,
                args.offset
            ),
        }
    }
}

impl RelationLoader {
    /// A simple loader.
    pub fn simple(decorate: BuilderDecorator) -> Self {
        Self::Simple { decorate }
    }

    /// A paginated loader.
    pub fn paginated(decorate: BuilderDecorator, pagination: PaginationArgs) -> Self {
        Self::Paginated {
            decorate,
            pagination,
        }
    }

    /// Returns the shape used to detect divergent strategies.
    pub fn shape(&self) -> LoaderShape {
        match self {
            Self::Simple { .. } => LoaderShape::Simple,
            Self::Paginated { pagination, .. } => LoaderShape::Paginated(*pagination),
        }
    }

    /// Builds the decorated query of one fetch.
    pub fn query(&self) -> RelationQuery {
        let mut query = RelationQuery::new();
        match self {
            Self::Simple { decorate } | Self::Paginated { decorate, .. } => {
                decorate.apply(&mut query)
            }
        }
        query
    }

    /// Loads the relation for every parent with at most one fetch.
    ///
    /// The result is aligned with `parents`. Parents without a join value get
    /// an empty result; if none has one, nothing is fetched.
    pub async fn load(
        &self,
        association: &Association,
        parents: &[Value],
    ) -> LoaderResult<Vec<Value>> {
        let join_keys: Vec<Option<String>> = parents
            .iter()
            .map(|parent| association.join_value(parent).map(canonical_json))
            .collect();

        let mut owners: IndexMap<String, Value> = IndexMap::new();
        for (parent, join_key) in parents.iter().zip(&join_keys) {
            if let (Some(key), Some(value)) = (join_key, association.join_value(parent)) {
                owners.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        let mut groups: IndexMap<String, Vec<Value>> = IndexMap::new();
        if !owners.is_empty() {
            let owner_keys: Vec<Value> = owners.into_values().collect();
            let wanted: IndexSet<&str> = join_keys.iter().flatten().map(String::as_str).collect();
            let rows = association.fetch(&owner_keys, &self.query()).await?;
            for row in rows {
                if let Some(key) = association.related_join_key(&row) {
                    if wanted.contains(key.as_str()) {
                        groups.entry(key).or_default().push(row);
                    }
                }
            }
        }

        let to_many = association.relation().kind.is_to_many();
        Ok(join_keys
            .iter()
            .map(|join_key| {
                let rows = join_key
                    .as_ref()
                    .and_then(|key| groups.get(key))
                    .cloned()
                    .unwrap_or_default();
                self.shape_rows(rows, to_many)
            })
            .collect())
    }

    /// Loads the relation for a single parent.
    pub async fn load_one(&self, association: &Association, parent: &Value) -> LoaderResult<Value> {
        let mut values = self.load(association, std::slice::from_ref(parent)).await?;
        Ok(values.pop().unwrap_or(Value::Null))
    }

    fn shape_rows(&self, rows: Vec<Value>, to_many: bool) -> Value {
        match self {
            Self::Paginated { pagination, .. } => pagination.apply(rows).into_value(),
            Self::Simple { .. } if to_many => Value::Array(rows),
            Self::Simple { .. } => rows.into_iter().next().unwrap_or(Value::Null),
        }
    }
}
