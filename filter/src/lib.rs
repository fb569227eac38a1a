//! Lantern filter language.
//!
//! A small boolean expression language for narrowing log rows. The same
//! parsed [`Filter`] is either compiled to a SQL predicate for database
//! backends or evaluated in-process for streaming backends.
//!
//! # Supported Syntax
//!
//! ```text
//! level = 'error' and service != api
//! labels:app = web or (message contains 'timeout' and not status = 200)
//! message ~ 'conn(ection)? refused'
//! ```
//!
//! Keys are `:`-separated: the first segment names a column and the
//! remaining segments descend into JSON, map or array content.
//!
//! # Example
//!
//! ```
//! use filter::{parse, Evaluator};
//! use serde_json::json;
//!
//! let filter = parse("level = error and labels:app = web").unwrap();
//! let evaluator = Evaluator::new(&filter, &["level", "labels"]).unwrap();
//!
//! let row = json!({"level": "error", "labels": {"app": "web"}});
//! assert!(evaluator.matches(row.as_object().unwrap()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod ast;
mod evaluator;
mod parser;
pub mod sql;

pub use ast::*;
pub use evaluator::{check_fields, Evaluator};
pub use parser::{parse, ParseError};
pub use sql::{to_sql, ColumnInfo, Dialect};

use thiserror::Error;

/// Errors raised while preparing a parsed filter for a particular source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// The filter text could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A key is not rooted at any column of the source.
    #[error("Unknown field: '{0}'")]
    UnknownField(String),

    /// A nested key cannot be addressed on its column.
    #[error("Unsupported key '{key}': {reason}")]
    UnsupportedKey {
        /// The key as written.
        key: String,
        /// Why it cannot be used.
        reason: String,
    },

    /// A regular expression failed to compile.
    #[error("Invalid regular expression '{pattern}': {reason}")]
    InvalidRegex {
        /// The pattern as written.
        pattern: String,
        /// Compiler message.
        reason: String,
    },
}
