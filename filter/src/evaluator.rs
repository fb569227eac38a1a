//! In-process filter evaluation.
//!
//! Streaming backends cannot push a filter down to the server, so each row is
//! checked locally after it is built.

use super::ast::{ComparisonOp, Condition, Expr, Filter, Key, LogicalOp, Value};
use super::FilterError;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use std::borrow::Cow;
use std::collections::HashMap;

/// A filter prepared for repeated evaluation against rows.
///
/// Construction checks that every referenced key is rooted at a known column
/// and compiles regular expressions once.
#[derive(Debug, Clone)]
pub struct Evaluator {
    root: Expr,
    patterns: HashMap<String, Regex>,
}

impl Evaluator {
    /// Prepares `filter` for evaluation over rows with the given columns.
    ///
    /// # Errors
    ///
    /// Returns `FilterError::UnknownField` if a key is not rooted at one of
    /// `columns`, or `FilterError::InvalidRegex` if a pattern fails to compile.
    pub fn new<S: AsRef<str>>(filter: &Filter, columns: &[S]) -> Result<Self, FilterError> {
        check_fields(filter, columns)?;

        let mut patterns = HashMap::new();
        compile_patterns(&filter.root, &mut patterns)?;

        Ok(Self {
            root: filter.root.clone(),
            patterns,
        })
    }

    /// Returns true if the row satisfies the filter.
    #[must_use]
    pub fn matches(&self, row: &Map<String, JsonValue>) -> bool {
        self.evaluate(&self.root, row)
    }

    fn evaluate(&self, expr: &Expr, row: &Map<String, JsonValue>) -> bool {
        match expr {
            Expr::Condition(condition) => self.evaluate_condition(condition, row),
            Expr::Combined {
                left,
                operator,
                right,
            } => match operator {
                LogicalOp::And => self.evaluate(left, row) && self.evaluate(right, row),
                LogicalOp::Or => self.evaluate(left, row) || self.evaluate(right, row),
            },
            Expr::Not(inner) => !self.evaluate(inner, row),
            Expr::Grouped(inner) => self.evaluate(inner, row),
        }
    }

    fn evaluate_condition(&self, condition: &Condition, row: &Map<String, JsonValue>) -> bool {
        let Some(field) = lookup(row, &condition.key) else {
            return condition.operator.matches_missing();
        };
        if field.is_null() {
            return condition.operator.matches_missing();
        }

        match condition.operator {
            ComparisonOp::Regex | ComparisonOp::NotRegex => {
                let found = self
                    .patterns
                    .get(&condition.value.as_text())
                    .is_some_and(|re| re.is_match(&text_of(&field)));
                if condition.operator == ComparisonOp::Regex {
                    found
                } else {
                    !found
                }
            }
            ComparisonOp::Contains => lower(&field).contains(&condition.value.as_text().to_lowercase()),
            ComparisonOp::StartsWith => {
                lower(&field).starts_with(&condition.value.as_text().to_lowercase())
            }
            ComparisonOp::EndsWith => {
                lower(&field).ends_with(&condition.value.as_text().to_lowercase())
            }
            ComparisonOp::Eq
            | ComparisonOp::NotEq
            | ComparisonOp::Lt
            | ComparisonOp::LtEq
            | ComparisonOp::Gt
            | ComparisonOp::GtEq => compare(&field, condition.operator, &condition.value),
        }
    }
}

/// Checks that every key in `filter` is rooted at one of `columns`.
///
/// # Errors
///
/// Returns `FilterError::UnknownField` naming the first unknown key.
pub fn check_fields<S: AsRef<str>>(filter: &Filter, columns: &[S]) -> Result<(), FilterError> {
    for key in filter.keys() {
        if !columns.iter().any(|c| c.as_ref() == key.root()) {
            return Err(FilterError::UnknownField(key.raw.clone()));
        }
    }
    Ok(())
}

fn compile_patterns(expr: &Expr, patterns: &mut HashMap<String, Regex>) -> Result<(), FilterError> {
    match expr {
        Expr::Condition(c) => {
            if matches!(c.operator, ComparisonOp::Regex | ComparisonOp::NotRegex) {
                let pattern = c.value.as_text();
                if !patterns.contains_key(&pattern) {
                    let re = Regex::new(&pattern).map_err(|e| FilterError::InvalidRegex {
                        pattern: pattern.clone(),
                        reason: e.to_string(),
                    })?;
                    patterns.insert(pattern, re);
                }
            }
            Ok(())
        }
        Expr::Combined { left, right, .. } => {
            compile_patterns(left, patterns)?;
            compile_patterns(right, patterns)
        }
        Expr::Not(inner) | Expr::Grouped(inner) => compile_patterns(inner, patterns),
    }
}

/// Resolves a key against a row, descending into nested content.
///
/// String values met along the path are decoded as JSON before descending,
/// so columns holding JSON text behave like objects.
fn lookup<'a>(row: &'a Map<String, JsonValue>, key: &Key) -> Option<Cow<'a, JsonValue>> {
    let mut current = Cow::Borrowed(row.get(key.root())?);

    for segment in key.path() {
        current = match current {
            Cow::Borrowed(value) => descend(value, segment)?,
            Cow::Owned(value) => Cow::Owned(descend(&value, segment)?.into_owned()),
        };
    }

    Some(current)
}

fn descend<'a>(value: &'a JsonValue, segment: &str) -> Option<Cow<'a, JsonValue>> {
    match value {
        JsonValue::Object(map) => map.get(segment).map(Cow::Borrowed),
        JsonValue::Array(items) => {
            let index = segment.parse::<usize>().ok()?;
            // Array positions are 1-based, matching SQL array indexing.
            items.get(index.checked_sub(1)?).map(Cow::Borrowed)
        }
        JsonValue::String(text) => {
            let decoded: JsonValue = serde_json::from_str(text).ok()?;
            match decoded {
                JsonValue::Object(_) | JsonValue::Array(_) => {
                    descend(&decoded, segment).map(|v| Cow::Owned(v.into_owned()))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn text_of(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn lower(value: &JsonValue) -> String {
    text_of(value).to_lowercase()
}

fn compare(field: &JsonValue, operator: ComparisonOp, expected: &Value) -> bool {
    use std::cmp::Ordering;

    let ordering = match (field, expected) {
        (JsonValue::Bool(actual), Value::Boolean(wanted)) => Some(actual.cmp(wanted)),
        (JsonValue::String(actual), Value::Boolean(wanted)) => actual
            .parse::<bool>()
            .ok()
            .map(|parsed| parsed.cmp(wanted)),
        (_, Value::Integer(_) | Value::Float(_)) => {
            let wanted = expected.as_number();
            let actual = match field {
                JsonValue::Number(n) => n.as_f64(),
                JsonValue::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            match (actual, wanted) {
                (Some(a), Some(w)) => a.partial_cmp(&w),
                _ => None,
            }
        }
        _ => Some(text_of(field).as_str().cmp(expected.as_text().as_str())),
    };

    match ordering {
        Some(Ordering::Equal) => matches!(
            operator,
            ComparisonOp::Eq | ComparisonOp::LtEq | ComparisonOp::GtEq
        ),
        Some(Ordering::Less) => matches!(
            operator,
            ComparisonOp::NotEq | ComparisonOp::Lt | ComparisonOp::LtEq
        ),
        Some(Ordering::Greater) => matches!(
            operator,
            ComparisonOp::NotEq | ComparisonOp::Gt | ComparisonOp::GtEq
        ),
        None => operator == ComparisonOp::NotEq,
    }
}
