//! Pagination of relation fields.
//!
//! Pagination is applied per parent, after the rows of the combined fetch are
//! grouped, so predicates and sorting from the decorator are in effect before
//! any slicing happens.

use crate::error::ConfigurationError;
use crate::scope::ArgumentSet;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Shape of a paginated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaginationType {
    /// Page-number pagination with totals.
    Paginator,
    /// Page-number pagination without totals.
    Simple,
    /// Cursor pagination (`first` / `after`).
    Connection,
}

impl PaginationType {
    /// Returns the type name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Paginator => "PAGINATOR",
            Self::Simple => "SIMPLE",
            Self::Connection => "CONNECTION",
        }
    }
}

/// Global pagination settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PaginationConfig {
    /// Page size used when a query gives none.
    pub default_count: Option<usize>,
    /// Upper bound for requested page sizes.
    pub max_count: Option<usize>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_count: Some(10),
            max_count: None,
        }
    }
}

/// Pagination arguments of one field occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaginationArgs {
    /// Pagination type.
    pub kind: PaginationType,
    /// Page size, after defaulting and clamping.
    pub first: usize,
    /// Number of rows skipped.
    pub offset: usize,
}

impl PaginationArgs {
    /// Reads `first` and `page` / `after` from the field arguments.
    ///
    /// A missing page size falls back to `default_count`; a size above
    /// `max_count` is clamped to it.
    pub fn extract(
        args: &ArgumentSet,
        kind: PaginationType,
        field: &str,
        default_count: Option<usize>,
        max_count: Option<usize>,
    ) -> Result<Self, ConfigurationError> {
        let requested = match args.get("first").filter(|v| !v.is_null()) {
            Some(value) => non_negative("first", value)?,
            None => default_count.ok_or_else(|| ConfigurationError::MissingPageSize(field.to_string()))?,
        };
        let first = match max_count {
            Some(max) => requested.min(max),
            None => requested,
        };

        let offset = match kind {
            PaginationType::Connection => match args.get("after").filter(|v| !v.is_null()) {
                Some(Value::String(encoded)) => cursor::decode(encoded)?,
                Some(_) => return Err(invalid("after", "expected a cursor string")),
                None => 0,
            },
            PaginationType::Paginator | PaginationType::Simple => {
                let page = match args.get("page").filter(|v| !v.is_null()) {
                    Some(value) => non_negative("page", value)?,
                    None => 1,
                };
                if page == 0 {
                    return Err(invalid("page", "pages start at 1"));
                }
                (page - 1).saturating_mul(first)
            }
        };

        Ok(Self { kind, first, offset })
    }

    /// Slices the rows of one parent into a page.
    pub fn apply(&self, rows: Vec<Value>) -> Page {
        let total = rows.len();
        let items = rows.into_iter().skip(self.offset).take(self.first).collect();
        Page {
            kind: self.kind,
            items,
            total,
            per_page: self.first,
            offset: self.offset,
        }
    }
}

fn non_negative(argument: &str, value: &Value) -> Result<usize, ConfigurationError> {
    match value.as_i64() {
        Some(n) if n >= 0 => usize::try_from(n).map_err(|_| invalid(argument, "value is too large")),
        Some(_) => Err(invalid(argument, "must not be negative")),
        None => Err(invalid(argument, "expected an integer")),
    }
}

fn invalid(argument: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidPaginationArgument {
        argument: argument.to_string(),
        reason: reason.to_string(),
    }
}

/// One page of a relation.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub kind: PaginationType,
    pub items: Vec<Value>,
    pub total: usize,
    pub per_page: usize,
    pub offset: usize,
}

impl Page {
    /// One-based number of the current page.
    pub fn current_page(&self) -> usize {
        if self.per_page == 0 {
            1
        } else {
            self.offset / self.per_page + 1
        }
    }

    /// Number of the last page, at least 1.
    pub fn last_page(&self) -> usize {
        if self.per_page == 0 {
            1
        } else {
            self.total.div_ceil(self.per_page).max(1)
        }
    }

    /// Returns true if rows follow this page.
    pub fn has_more(&self) -> bool {
        self.offset + self.items.len() < self.total
    }

    fn first_item(&self) -> Option<usize> {
        (!self.items.is_empty()).then_some(self.offset + 1)
    }

    fn last_item(&self) -> Option<usize> {
        (!self.items.is_empty()).then_some(self.offset + self.items.len())
    }

    /// Converts the page into the field's output shape.
    pub fn into_value(self) -> Value {
        match self.kind {
            PaginationType::Paginator => json!({
                "paginatorInfo": {
                    "count": self.items.len(),
                    "currentPage": self.current_page(),
                    "firstItem": self.first_item(),
                    "hasMorePages": self.has_more(),
                    "lastItem": self.last_item(),
                    "lastPage": self.last_page(),
                    "perPage": self.per_page,
                    "total": self.total,
                },
                "data": self.items,
            }),
            PaginationType::Simple => json!({
                "paginatorInfo": {
                    "count": self.items.len(),
                    "currentPage": self.current_page(),
                    "firstItem": self.first_item(),
                    "lastItem": self.last_item(),
                    "perPage": self.per_page,
                },
                "data": self.items,
            }),
            PaginationType::Connection => {
                let start = self.first_item().map(cursor::encode);
                let end = self.last_item().map(cursor::encode);
                let page_info = json!({
                    "hasNextPage": self.has_more(),
                    "hasPreviousPage": self.offset > 0,
                    "startCursor": start,
                    "endCursor": end,
                    "total": self.total,
                    "count": self.items.len(),
                    "currentPage": self.current_page(),
                    "lastPage": self.last_page(),
                });
                let offset = self.offset;
                let edges: Vec<Value> = self
                    .items
                    .into_iter()
                    .enumerate()
                    .map(|(i, node)| json!({"node": node, "cursor": cursor::encode(offset + i + 1)}))
                    .collect();
                json!({ "edges": edges, "pageInfo": page_info })
            }
        }
    }
}

/// Opaque connection cursors.
pub mod cursor {
    use super::invalid;
    use crate::error::ConfigurationError;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    /// Encodes a one-based item position.
    pub fn encode(position: usize) -> String {
        STANDARD.encode(position.to_string())
    }

    /// Decodes a cursor into the position it encodes.
    pub fn decode(cursor: &str) -> Result<usize, ConfigurationError> {
        let bytes = STANDARD
            .decode(cursor)
            .map_err(|_| invalid("after", "malformed cursor"))?;
        std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| invalid("after", "malformed cursor"))
    }
}
