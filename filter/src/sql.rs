//! Compiles filter expressions into SQL predicates.

use super::ast::{ComparisonOp, Condition, Expr, Filter, Key, LogicalOp, Value};
use super::FilterError;
use std::collections::HashMap;

/// SQL dialect targeted by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// ClickHouse SQL.
    ClickHouse,
    /// StarRocks (MySQL protocol) SQL.
    StarRocks,
}

impl Dialect {
    /// Quotes an identifier.
    #[must_use]
    pub fn quote(self, ident: &str) -> String {
        match self {
            Self::ClickHouse => format!("\"{}\"", ident.replace('"', "\"\"")),
            Self::StarRocks => format!("`{}`", ident.replace('`', "``")),
        }
    }
}

/// What the compiler needs to know about a column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// The declared type, e.g. `String`, `Map(String, String)`.
    pub type_name: String,
    /// True when the column holds JSON-encoded text.
    pub json_string: bool,
}

impl ColumnInfo {
    /// Creates column info for a plain column.
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            json_string: false,
        }
    }

    /// Marks the column as holding JSON text.
    #[must_use]
    pub fn with_json_string(mut self, json_string: bool) -> Self {
        self.json_string = json_string;
        self
    }

    /// The outermost type, lower-cased, with `Nullable(...)` and
    /// `LowCardinality(...)` wrappers removed.
    #[must_use]
    pub fn base_type(&self) -> String {
        base_type(&self.type_name)
    }
}

/// Strips nullability wrappers and returns the lower-cased outer type name.
#[must_use]
pub fn base_type(type_name: &str) -> String {
    let mut current = type_name.trim();
    loop {
        let lowered = current.to_ascii_lowercase();
        let stripped = ["nullable(", "lowcardinality("]
            .iter()
            .find(|prefix| lowered.starts_with(*prefix) && current.ends_with(')'))
            .map(|prefix| &current[prefix.len()..current.len() - 1]);
        match stripped {
            Some(inner) => current = inner.trim(),
            None => break,
        }
    }
    let lowered = current.to_ascii_lowercase();
    lowered
        .split(|c: char| c == '(' || c == '<')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Escapes a string so it can be embedded between single quotes.
///
/// Control characters are written as backslash escapes and backslashes and
/// single quotes are escaped, so no input can terminate the literal.
#[must_use]
pub fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            '\u{7}' => out.push_str("\\a"),
            '\u{b}' => out.push_str("\\v"),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            other => out.push(other),
        }
    }
    out
}

/// Renders a quoted, escaped string literal.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", escape_literal(value))
}

/// Compiles `filter` into a SQL boolean expression.
///
/// # Errors
///
/// Returns `FilterError::UnknownField` for keys not rooted at a known column
/// and `FilterError::UnsupportedKey` for nested keys on scalar columns.
pub fn to_sql(
    filter: &Filter,
    columns: &HashMap<String, ColumnInfo>,
    dialect: Dialect,
) -> Result<String, FilterError> {
    compile(&filter.root, columns, dialect)
}

fn compile(
    expr: &Expr,
    columns: &HashMap<String, ColumnInfo>,
    dialect: Dialect,
) -> Result<String, FilterError> {
    match expr {
        Expr::Condition(c) => compile_condition(c, columns, dialect),
        Expr::Combined {
            left,
            operator,
            right,
        } => {
            let op = match operator {
                LogicalOp::And => "AND",
                LogicalOp::Or => "OR",
            };
            Ok(format!(
                "{} {op} {}",
                compile(left, columns, dialect)?,
                compile(right, columns, dialect)?
            ))
        }
        Expr::Not(inner) => Ok(format!("NOT ({})", compile(inner, columns, dialect)?)),
        Expr::Grouped(inner) => Ok(format!("({})", compile(inner, columns, dialect)?)),
    }
}

fn compile_condition(
    condition: &Condition,
    columns: &HashMap<String, ColumnInfo>,
    dialect: Dialect,
) -> Result<String, FilterError> {
    let column = columns
        .get(condition.key.root())
        .ok_or_else(|| FilterError::UnknownField(condition.key.raw.clone()))?;
    let target = key_expression(&condition.key, column, dialect)?;
    let text = quote_literal(&condition.value.as_text());

    let sql = match condition.operator {
        ComparisonOp::Eq => format!("{target} = {}", literal(&condition.value)),
        ComparisonOp::NotEq => format!("{target} != {}", literal(&condition.value)),
        ComparisonOp::Lt => format!("{target} < {}", literal(&condition.value)),
        ComparisonOp::LtEq => format!("{target} <= {}", literal(&condition.value)),
        ComparisonOp::Gt => format!("{target} > {}", literal(&condition.value)),
        ComparisonOp::GtEq => format!("{target} >= {}", literal(&condition.value)),
        ComparisonOp::Contains => match dialect {
            Dialect::ClickHouse => format!("positionCaseInsensitiveUTF8({target}, {text}) > 0"),
            Dialect::StarRocks => format!("locate(lower({text}), lower({target})) > 0"),
        },
        ComparisonOp::StartsWith => match dialect {
            Dialect::ClickHouse => format!("startsWith(lowerUTF8({target}), lowerUTF8({text}))"),
            Dialect::StarRocks => format!("starts_with(lower({target}), lower({text}))"),
        },
        ComparisonOp::EndsWith => match dialect {
            Dialect::ClickHouse => format!("endsWith(lowerUTF8({target}), lowerUTF8({text}))"),
            Dialect::StarRocks => format!("ends_with(lower({target}), lower({text}))"),
        },
        ComparisonOp::Regex => regex_match(&target, &text, dialect),
        ComparisonOp::NotRegex => format!("NOT {}", regex_match(&target, &text, dialect)),
    };

    Ok(sql)
}

fn regex_match(target: &str, pattern: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::ClickHouse => format!("match({target}, {pattern})"),
        Dialect::StarRocks => format!("regexp({target}, {pattern})"),
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => quote_literal(s),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
    }
}

/// Builds the SQL expression extracting the text at `path` from the JSON in
/// the (already quoted) column expression `quoted`.
#[must_use]
pub fn json_extract<S: AsRef<str>>(quoted: &str, path: &[S], dialect: Dialect) -> String {
    match dialect {
        Dialect::ClickHouse => {
            let args: Vec<String> = path.iter().map(|p| quote_literal(p.as_ref())).collect();
            format!("JSONExtractString({quoted}, {})", args.join(", "))
        }
        Dialect::StarRocks => {
            let json_path: String = path
                .iter()
                .map(|p| format!(".\"{}\"", p.as_ref().replace('"', "\\\"")))
                .collect();
            format!("get_json_string({quoted}, {})", quote_literal(&format!("${json_path}")))
        }
    }
}

/// Builds the SQL expression addressing `key` within `column`.
fn key_expression(key: &Key, column: &ColumnInfo, dialect: Dialect) -> Result<String, FilterError> {
    let quoted = dialect.quote(&column.name);
    if !key.is_nested() {
        return Ok(quoted);
    }

    let path = key.path();
    let base = column.base_type();

    if column.json_string || base == "json" {
        return Ok(json_extract(&quoted, path, dialect));
    }

    if base == "map" {
        let map_key = path.join(":");
        return Ok(format!("{quoted}[{}]", quote_literal(&map_key)));
    }

    if base == "array" && path.len() == 1 {
        let index: i64 = path[0]
            .parse()
            .map_err(|_| FilterError::UnsupportedKey {
                key: key.raw.clone(),
                reason: format!("'{}' is not an array index", path[0]),
            })?;
        return Ok(format!("{quoted}[{index}]"));
    }

    Err(FilterError::UnsupportedKey {
        key: key.raw.clone(),
        reason: format!("column '{}' does not support nested keys", column.name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn columns() -> HashMap<String, ColumnInfo> {
        [
            ColumnInfo::new("level", "LowCardinality(String)"),
            ColumnInfo::new("message", "String"),
            ColumnInfo::new("status", "UInt16"),
            ColumnInfo::new("labels", "Map(String, String)"),
            ColumnInfo::new("payload", "String").with_json_string(true),
            ColumnInfo::new("tags", "Array(String)"),
        ]
        .into_iter()
        .map(|c| (c.name.clone(), c))
        .collect()
    }

    fn compile_ch(text: &str) -> Result<String, FilterError> {
        to_sql(&parse(text).unwrap(), &columns(), Dialect::ClickHouse)
    }

    fn compile_sr(text: &str) -> Result<String, FilterError> {
        to_sql(&parse(text).unwrap(), &columns(), Dialect::StarRocks)
    }

    #[test]
    fn test_base_type() {
        assert_eq!(base_type("Nullable(LowCardinality(String))"), "string");
        assert_eq!(base_type("Map(String, String)"), "map");
        assert_eq!(base_type("Array(Map(String, String))"), "array");
        assert_eq!(base_type("JSON"), "json");
        assert_eq!(base_type("DateTime64(3, 'UTC')"), "datetime64");
    }

    #[test]
    fn test_escape_literal() {
        assert_eq!(escape_literal("it's"), "it\\'s");
        assert_eq!(escape_literal("a\\b"), "a\\\\b");
        assert_eq!(escape_literal("line\nnext\t\0"), "line\\nnext\\t\\0");
        assert_eq!(escape_literal("\u{8}\u{c}\r\u{7}\u{b}"), "\\b\\f\\r\\a\\v");
    }

    #[test]
    fn test_simple_conditions() {
        assert_eq!(
            compile_ch("level = error and status >= 500").unwrap(),
            "\"level\" = 'error' AND \"status\" >= 500"
        );
        assert_eq!(
            compile_sr("level = error or not status = 200").unwrap(),
            "`level` = 'error' OR NOT (`status` = 200)"
        );
    }

    #[test]
    fn test_injection_is_escaped() {
        let sql = compile_ch(r#"message = "x' OR 1=1 --""#).unwrap();
        assert_eq!(sql, "\"message\" = 'x\\' OR 1=1 --'");
    }

    #[test]
    fn test_substring_and_regex() {
        assert_eq!(
            compile_ch("message contains Timeout").unwrap(),
            "positionCaseInsensitiveUTF8(\"message\", 'Timeout') > 0"
        );
        assert_eq!(
            compile_sr("message contains Timeout").unwrap(),
            "locate(lower('Timeout'), lower(`message`)) > 0"
        );
        assert_eq!(
            compile_ch("message !~ '^GET'").unwrap(),
            "NOT match(\"message\", '^GET')"
        );
        assert_eq!(
            compile_sr("message ~ '^GET'").unwrap(),
            "regexp(`message`, '^GET')"
        );
    }

    #[test]
    fn test_nested_keys() {
        assert_eq!(
            compile_ch("labels:app = web").unwrap(),
            "\"labels\"['app'] = 'web'"
        );
        assert_eq!(
            compile_ch("payload:user:id = '42'").unwrap(),
            "JSONExtractString(\"payload\", 'user', 'id') = '42'"
        );
        assert_eq!(
            compile_sr("payload:user:id = '42'").unwrap(),
            "get_json_string(`payload`, '$.\"user\".\"id\"') = '42'"
        );
        assert_eq!(compile_ch("tags:1 = a").unwrap(), "\"tags\"[1] = 'a'");
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            compile_ch("host = a"),
            Err(FilterError::UnknownField(f)) if f == "host"
        ));
        assert!(matches!(
            compile_ch("level:x = a"),
            Err(FilterError::UnsupportedKey { .. })
        ));
        assert!(matches!(
            compile_ch("tags:first = a"),
            Err(FilterError::UnsupportedKey { .. })
        ));
    }
}
