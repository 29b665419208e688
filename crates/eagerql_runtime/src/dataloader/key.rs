//! Batch identity.

use crate::executor::PathSegment;
use crate::scope::ArgumentSet;
use serde_json::Value;
use std::fmt;

/// Identifies which pending relation loads may share one fetch.
///
/// Two field occurrences batch together only if relation, field position,
/// scopes, arguments and parent discriminator are all equal. List indices are
/// not part of the position, so every element of a list shares one key.
/// Keys of eager-load middleware are marked, so they never share a batch with
/// the relation field at the same position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    relation: String,
    path: Vec<String>,
    scopes: Vec<String>,
    arguments: String,
    parent_type: Option<String>,
    eager_load: bool,
}

impl BatchKey {
    /// Creates a key.
    pub fn new(
        relation: impl Into<String>,
        path: &[PathSegment],
        scopes: &[String],
        arguments: &ArgumentSet,
    ) -> Self {
        let path = path
            .iter()
            .filter_map(|segment| match segment {
                PathSegment::Field(name) => Some(name.clone()),
                PathSegment::Index(_) => None,
            })
            .collect();

        Self {
            relation: relation.into(),
            path,
            scopes: scopes.to_vec(),
            arguments: arguments.canonical(),
            parent_type: None,
            eager_load: false,
        }
    }

    /// Separates parents of a concrete type from other types at the same path.
    pub fn with_parent_type(mut self, type_name: impl Into<String>) -> Self {
        self.parent_type = Some(type_name.into());
        self
    }

    /// Marks the key as belonging to an eager-load middleware.
    pub fn eager_load(mut self) -> Self {
        self.eager_load = true;
        self
    }

    /// Returns true for eager-load middleware keys.
    pub fn is_eager_load(&self) -> bool {
        self.eager_load
    }

    /// The relation name.
    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// The field position, without list indices.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// The scopes, in declared order.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// The canonical argument tree.
    pub fn arguments(&self) -> &str {
        &self.arguments
    }

    /// The parent discriminator, if any.
    pub fn parent_type(&self) -> Option<&str> {
        self.parent_type.as_deref()
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.relation, self.path.join("."))?;
        if !self.scopes.is_empty() {
            write!(f, "[{}]", self.scopes.join(","))?;
        }
        if self.arguments != "{}" {
            write!(f, "{}", self.arguments)?;
        }
        if let Some(parent_type) = &self.parent_type {
            write!(f, "<{parent_type}>")?;
        }
        if self.eager_load {
            f.write_str("+with")?;
        }
        Ok(())
    }
}

/// Identity of a parent record within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParentKey {
    model: String,
    id: String,
}

impl ParentKey {
    /// Creates a parent key from a model name and primary key value.
    pub fn new(model: &str, id: &Value) -> Self {
        Self {
            model: model.to_string(),
            id: canonical_json(id),
        }
    }

    /// The model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The canonical primary key.
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Serializes a value with object keys sorted, so equal trees compare equal
/// as strings regardless of insertion order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(segments: &[&str]) -> Vec<PathSegment> {
        segments
            .iter()
            .map(|s| match s.parse::<usize>() {
                Ok(i) => PathSegment::Index(i),
                Err(_) => PathSegment::Field((*s).to_string()),
            })
            .collect()
    }

    #[test]
    fn test_list_indices_are_ignored() {
        let a = BatchKey::new("comments", &path(&["posts", "0", "comments"]), &[], &ArgumentSet::new());
        let b = BatchKey::new("comments", &path(&["posts", "7", "comments"]), &[], &ArgumentSet::new());
        assert_eq!(a, b);
        assert_eq!(a.path(), ["posts", "comments"]);
    }

    #[test]
    fn test_every_component_distinguishes() {
        let args = ArgumentSet::new();
        let base = BatchKey::new("comments", &path(&["posts", "comments"]), &[], &args);

        let other_path = BatchKey::new("comments", &path(&["post", "comments"]), &[], &args);
        let other_scopes =
            BatchKey::new("comments", &path(&["posts", "comments"]), &["onlyApproved".into()], &args);
        let other_args = BatchKey::new(
            "comments",
            &path(&["posts", "comments"]),
            &[],
            &ArgumentSet::new().with("first", json!(2)),
        );
        let other_parent = base.clone().with_parent_type("Video");
        let eager = base.clone().eager_load();

        for other in [other_path, other_scopes, other_args, other_parent, eager] {
            assert_ne!(base, other);
        }
    }

    #[test]
    fn test_scope_order_matters() {
        let args = ArgumentSet::new();
        let p = path(&["posts", "comments"]);
        let a = BatchKey::new("comments", &p, &["a".into(), "b".into()], &args);
        let b = BatchKey::new("comments", &p, &["b".into(), "a".into()], &args);
        assert_ne!(a, b);
    }

    #[test]
    fn test_display() {
        let key = BatchKey::new(
            "comments",
            &path(&["posts", "0", "comments"]),
            &["onlyApproved".into()],
            &ArgumentSet::new(),
        )
        .with_parent_type("Post");
        assert_eq!(key.to_string(), "comments@posts.comments[onlyApproved]<Post>");
    }

    #[test]
    fn test_canonical_json() {
        assert_eq!(
            canonical_json(&json!({"b": [1, {"d": null, "c": "x"}], "a": true})),
            r#"{"a":true,"b":[1,{"c":"x","d":null}]}"#
        );
        assert_ne!(canonical_json(&json!(1)), canonical_json(&json!("1")));
    }

    #[test]
    fn test_parent_key() {
        let a = ParentKey::new("User", &json!(1));
        assert_eq!(a.model(), "User");
        assert_eq!(a.id(), "1");
        assert_ne!(a, ParentKey::new("Post", &json!(1)));
    }
}
