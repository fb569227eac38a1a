//! Group-by column resolution.
//!
//! A group-by reference is `column` or `column:qualifier[:qualifier...]`.
//! How the qualifiers are read depends on the column type: a JSON path for
//! JSON columns, a single key for maps, an index for arrays. Scalar columns
//! accept no qualifier.

use crate::models::source::Source;
use serde_json::{Map, Value};
use thiserror::Error;

/// Group key for rows whose group value is missing, null or empty.
pub const NONE_GROUP: &str = "__none__";

/// Series key used when a graph is not grouped.
pub const ROWS_GROUP: &str = "Rows";

/// Errors that can occur while resolving a group-by reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColumnError {
    /// The reference is empty.
    #[error("Group by column cannot be empty")]
    Empty,

    /// The root column is not declared on the source.
    #[error("Unknown group by column: '{0}'")]
    UnknownColumn(String),

    /// The column is not marked as groupable.
    #[error("Column '{0}' cannot be used for grouping")]
    NotGroupable(String),

    /// A qualifier was used on a column that has no nested content.
    #[error("Column '{column}' of type '{type_name}' does not support nested keys")]
    NestedKeyNotSupported {
        /// The root column.
        column: String,
        /// Its declared type.
        type_name: String,
    },

    /// An array qualifier is not a single integer index.
    #[error("Invalid array index '{index}' for column '{column}'")]
    InvalidArrayIndex {
        /// The root column.
        column: String,
        /// The offending qualifier.
        index: String,
    },
}

/// How the group value is taken from the root column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupByKind {
    /// The column value itself.
    Plain,
    /// A path through JSON content.
    JsonPath(Vec<String>),
    /// A key of a map column.
    MapKey(String),
    /// A 1-based position in an array column.
    ArrayIndex(i64),
}

/// A resolved group-by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupByColumn {
    /// The reference as written.
    pub name: String,
    /// The root column.
    pub root: String,
    /// How to address the value within the root column.
    pub kind: GroupByKind,
}

/// Resolves a group-by reference against a source's declared columns.
///
/// # Errors
///
/// Returns a `ColumnError` if the root column is unknown or not groupable,
/// if qualifiers are given for a scalar column, or if an array qualifier is
/// not an integer.
pub fn resolve_group_by(source: &Source, reference: &str) -> Result<GroupByColumn, ColumnError> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(ColumnError::Empty);
    }

    let (root, qualifier) = match reference.split_once(':') {
        Some((root, rest)) => (root, Some(rest)),
        None => (reference, None),
    };

    let column = source
        .column(root)
        .ok_or_else(|| ColumnError::UnknownColumn(root.to_string()))?;
    if !column.groupable {
        return Err(ColumnError::NotGroupable(root.to_string()));
    }

    let kind = match qualifier {
        None => GroupByKind::Plain,
        Some(rest) if column.is_json() => {
            GroupByKind::JsonPath(rest.split(':').map(str::to_string).collect())
        }
        Some(rest) if column.is_map() => GroupByKind::MapKey(rest.to_string()),
        Some(rest) if column.is_array() => {
            let index = rest
                .parse::<i64>()
                .map_err(|_| ColumnError::InvalidArrayIndex {
                    column: root.to_string(),
                    index: rest.to_string(),
                })?;
            GroupByKind::ArrayIndex(index)
        }
        Some(_) => {
            return Err(ColumnError::NestedKeyNotSupported {
                column: root.to_string(),
                type_name: column.type_name.clone(),
            })
        }
    };

    Ok(GroupByColumn {
        name: reference.to_string(),
        root: root.to_string(),
        kind,
    })
}

impl GroupByColumn {
    /// Extracts the group key from a row's data.
    ///
    /// A missing, null or empty value, or content that cannot be decoded,
    /// yields [`NONE_GROUP`].
    #[must_use]
    pub fn key_for(&self, data: &Map<String, Value>) -> String {
        let Some(root) = data.get(&self.root) else {
            return NONE_GROUP.to_string();
        };

        let value = match &self.kind {
            GroupByKind::Plain => Some(root.clone()),
            GroupByKind::JsonPath(path) => follow_json(root, path),
            GroupByKind::MapKey(key) => decoded(root)
                .as_ref()
                .and_then(Value::as_object)
                .and_then(|m| m.get(key))
                .cloned(),
            GroupByKind::ArrayIndex(index) => decoded(root)
                .as_ref()
                .and_then(Value::as_array)
                .and_then(|items| {
                    let position = usize::try_from(*index).ok()?.checked_sub(1)?;
                    items.get(position).cloned()
                }),
        };

        group_key(value.as_ref())
    }
}

/// Normalizes a group value into a series key.
#[must_use]
pub fn group_key(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => NONE_GROUP.to_string(),
        Some(Value::String(s)) if s.is_empty() => NONE_GROUP.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn decoded(value: &Value) -> Option<Value> {
    match value {
        Value::String(text) => serde_json::from_str(text).ok(),
        other => Some(other.clone()),
    }
}

fn follow_json(root: &Value, path: &[String]) -> Option<Value> {
    let mut current = decoded(root)?;
    for key in path {
        current = current.as_object()?.get(key)?.clone();
    }
    Some(current)
}
