//! Abstract Syntax Tree definitions for the filter language.

use serde::{Deserialize, Serialize};

/// Comparison operators for filter conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    /// Equal (=)
    Eq,
    /// Not equal (!=, <>)
    NotEq,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    LtEq,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    GtEq,
    /// Contains (case-insensitive substring match)
    Contains,
    /// Starts with (case-insensitive)
    StartsWith,
    /// Ends with (case-insensitive)
    EndsWith,
    /// Regular expression search (~)
    Regex,
    /// Negated regular expression search (!~)
    NotRegex,
}

impl ComparisonOp {
    /// Returns true if the operator matches rows where the key is absent.
    #[must_use]
    pub fn matches_missing(self) -> bool {
        matches!(self, Self::NotEq | Self::NotRegex)
    }
}

impl std::fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::NotEq => write!(f, "!="),
            Self::Lt => write!(f, "<"),
            Self::LtEq => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::GtEq => write!(f, ">="),
            Self::Contains => write!(f, "contains"),
            Self::StartsWith => write!(f, "starts with"),
            Self::EndsWith => write!(f, "ends with"),
            Self::Regex => write!(f, "~"),
            Self::NotRegex => write!(f, "!~"),
        }
    }
}

/// Logical operators for combining conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    /// Logical AND
    And,
    /// Logical OR
    Or,
}

impl std::fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And => write!(f, "and"),
            Self::Or => write!(f, "or"),
        }
    }
}

/// A literal value on the right-hand side of a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// String value (quoted or bare word)
    String(String),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Boolean value
    Boolean(bool),
}

impl Value {
    /// Returns the value rendered as plain text, without quoting.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Float(fl) => fl.to_string(),
            Self::Boolean(b) => b.to_string(),
        }
    }

    /// Returns the numeric form of the value, if it has one.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(fl) => Some(*fl),
            Self::String(_) | Self::Boolean(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(fl) => write!(f, "{fl}"),
            Self::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// A key reference such as `level` or `labels:app:tier`.
///
/// The first segment names a column, the remaining segments descend into
/// nested content of that column (JSON objects, maps, arrays).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// The text exactly as written in the filter.
    pub raw: String,
    /// The `:`-separated segments of the key.
    pub segments: Vec<String>,
}

impl Key {
    /// Splits a raw key into its segments.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            segments: raw.split(':').map(str::to_string).collect(),
        }
    }

    /// The column the key is rooted at.
    #[must_use]
    pub fn root(&self) -> &str {
        self.segments.first().map_or("", String::as_str)
    }

    /// The nested path below the root column.
    #[must_use]
    pub fn path(&self) -> &[String] {
        self.segments.get(1..).unwrap_or_default()
    }

    /// Returns true if the key descends into nested content.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.segments.len() > 1
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// A single comparison condition (e.g., `level = 'error'`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// The key to compare.
    pub key: Key,
    /// The comparison operator.
    pub operator: ComparisonOp,
    /// The value to compare against.
    pub value: Value,
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.key, self.operator, self.value)
    }
}

/// A filter expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A single condition.
    Condition(Condition),
    /// Two expressions combined with a logical operator.
    Combined {
        /// Left-hand side expression.
        left: Box<Expr>,
        /// The logical operator.
        operator: LogicalOp,
        /// Right-hand side expression.
        right: Box<Expr>,
    },
    /// A negated expression.
    Not(Box<Expr>),
    /// A grouped expression (parentheses).
    Grouped(Box<Expr>),
}

impl Expr {
    /// Collects every key referenced by the expression, in order of appearance.
    #[must_use]
    pub fn keys(&self) -> Vec<&Key> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys<'a>(&'a self, keys: &mut Vec<&'a Key>) {
        match self {
            Self::Condition(c) => keys.push(&c.key),
            Self::Combined { left, right, .. } => {
                left.collect_keys(keys);
                right.collect_keys(keys);
            }
            Self::Not(inner) | Self::Grouped(inner) => inner.collect_keys(keys),
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Condition(c) => write!(f, "{c}"),
            Self::Combined {
                left,
                operator,
                right,
            } => write!(f, "{left} {operator} {right}"),
            Self::Not(inner) => write!(f, "not {inner}"),
            Self::Grouped(inner) => write!(f, "({inner})"),
        }
    }
}

/// A parsed filter: the source text plus its expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// The filter text as supplied by the user.
    pub text: String,
    /// The root of the expression tree.
    pub root: Expr,
}

impl Filter {
    /// Collects every key the filter references.
    #[must_use]
    pub fn keys(&self) -> Vec<&Key> {
        self.root.keys()
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.root)
    }
}
