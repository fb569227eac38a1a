//! Request models accepted by fetchers.

use super::source::Source;
use crate::columns::GroupByColumn;
use filter::Filter;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Context filters keyed by field (`context`, `namespace`, `pod_name`, ...).
/// An empty value list means no restriction on that field.
pub type ContextFilters = BTreeMap<String, Vec<String>>;

/// Default number of rows returned by a data request.
pub const DEFAULT_LIMIT: usize = 100;

/// A request for rows.
#[derive(Debug, Clone)]
pub struct DataRequest {
    /// The source to read.
    pub source: Arc<Source>,
    /// Start of the range in epoch milliseconds (inclusive).
    pub time_from: i64,
    /// End of the range in epoch milliseconds (inclusive).
    pub time_to: i64,
    /// Parsed filter.
    pub filter: Option<Filter>,
    /// Raw SQL predicate for sources that allow it.
    pub raw_filter: Option<String>,
    /// Restrictions on streaming targets.
    pub context_filters: ContextFilters,
    /// ORDER BY override.
    pub order_by_expression: Option<String>,
    /// Maximum number of rows.
    pub limit: usize,
}

impl DataRequest {
    /// Creates a request for the given range with the default limit.
    #[must_use]
    pub fn new(source: Arc<Source>, time_from: i64, time_to: i64) -> Self {
        Self {
            source,
            time_from,
            time_to,
            filter: None,
            raw_filter: None,
            context_filters: ContextFilters::new(),
            order_by_expression: None,
            limit: DEFAULT_LIMIT,
        }
    }

    /// Sets the filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Sets the raw SQL predicate.
    #[must_use]
    pub fn with_raw_filter(mut self, raw: impl Into<String>) -> Self {
        self.raw_filter = Some(raw.into());
        self
    }

    /// Restricts a context field to the given values.
    #[must_use]
    pub fn with_context(mut self, field: impl Into<String>, values: Vec<String>) -> Self {
        self.context_filters.insert(field.into(), values);
        self
    }

    /// Sets the ORDER BY override.
    #[must_use]
    pub fn with_order_by(mut self, expression: impl Into<String>) -> Self {
        self.order_by_expression = Some(expression.into());
        self
    }

    /// Sets the row limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// A request for a histogram.
#[derive(Debug, Clone)]
pub struct GraphDataRequest {
    /// The source to read.
    pub source: Arc<Source>,
    /// Start of the range in epoch milliseconds (inclusive).
    pub time_from: i64,
    /// End of the range in epoch milliseconds (inclusive).
    pub time_to: i64,
    /// Parsed filter.
    pub filter: Option<Filter>,
    /// Raw SQL predicate for sources that allow it.
    pub raw_filter: Option<String>,
    /// Restrictions on streaming targets.
    pub context_filters: ContextFilters,
    /// Resolved group-by column.
    pub group_by: Option<GroupByColumn>,
}

impl GraphDataRequest {
    /// Creates an ungrouped, unfiltered graph request.
    #[must_use]
    pub fn new(source: Arc<Source>, time_from: i64, time_to: i64) -> Self {
        Self {
            source,
            time_from,
            time_to,
            filter: None,
            raw_filter: None,
            context_filters: ContextFilters::new(),
            group_by: None,
        }
    }

    /// Sets the filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Sets the raw SQL predicate.
    #[must_use]
    pub fn with_raw_filter(mut self, raw: impl Into<String>) -> Self {
        self.raw_filter = Some(raw.into());
        self
    }

    /// Restricts a context field to the given values.
    #[must_use]
    pub fn with_context(mut self, field: impl Into<String>, values: Vec<String>) -> Self {
        self.context_filters.insert(field.into(), values);
        self
    }

    /// Groups the histogram by a resolved column.
    #[must_use]
    pub fn with_group_by(mut self, group_by: GroupByColumn) -> Self {
        self.group_by = Some(group_by);
        self
    }
}

/// A request for value suggestions.
#[derive(Debug, Clone)]
pub struct AutocompleteRequest {
    /// The source to read.
    pub source: Arc<Source>,
    /// Column to suggest values for.
    pub column: String,
    /// Start of the range in epoch milliseconds (inclusive).
    pub time_from: i64,
    /// End of the range in epoch milliseconds (inclusive).
    pub time_to: i64,
    /// Text the suggestions must contain.
    pub value: String,
}

impl AutocompleteRequest {
    /// Creates an autocomplete request.
    #[must_use]
    pub fn new(
        source: Arc<Source>,
        column: impl Into<String>,
        time_from: i64,
        time_to: i64,
        value: impl Into<String>,
    ) -> Self {
        Self {
            source,
            column: column.into(),
            time_from,
            time_to,
            value: value.into(),
        }
    }
}

/// Values requested for a context field, ignoring empty entries.
#[must_use]
pub fn context_values<'a>(filters: &'a ContextFilters, field: &str) -> Vec<&'a str> {
    filters
        .get(field)
        .map(|values| {
            values
                .iter()
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
