//! Lantern core library
//!
//! This crate runs uniform log queries against heterogeneous backends: SQL
//! tables (`ClickHouse`, `StarRocks`) and live container logs (Docker,
//! Kubernetes). Every backend returns the same normalized rows and the
//! same time histograms.
//!
//! # Modules
//!
//! - [`models`] - Sources, normalized rows, requests and responses
//! - [`fetchers`] - The backend adapters and the concurrent fetch pipeline
//! - [`severity`] - Rule-based severity classification
//! - [`columns`] - Group-by reference resolution
//! - [`graph`] - Time histogram aggregation
//! - [`cache`] - Fingerprint-keyed configuration caches
//! - [`config`] - Fetcher settings
//!
//! # Example
//!
//! ```
//! use shared::graph::Histogram;
//!
//! let mut histogram = Histogram::new(0, 10_000, false);
//! for ts in [1_000, 2_000, 3_000] {
//!     histogram.record(ts, "");
//! }
//!
//! let graph = histogram.finish();
//! assert_eq!(graph.total, 3);
//! assert_eq!(graph.data["Rows"].iter().sum::<u64>(), 3);
//! assert!(graph.timestamps.contains(&0) && graph.timestamps.contains(&10_000));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod columns;
pub mod config;
pub mod fetchers;
pub mod graph;
pub mod models;
pub mod severity;

pub use fetchers::{FetchError, Fetcher, Fetchers};

/// Re-export common dependencies for convenience.
pub use chrono;
pub use chrono_tz;
pub use filter;
pub use serde_json;
