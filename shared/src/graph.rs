//! Time histogram aggregation.
//!
//! Counts rows per time bucket, optionally split into series by a group
//! key. Bucket width depends only on the requested range so every backend
//! produces the same axis for the same range.

use crate::columns::ROWS_GROUP;
use crate::models::response::GraphDataResponse;
use std::collections::{BTreeMap, BTreeSet};

/// Target number of buckets for ranges longer than [`SHORT_RANGE_MS`].
pub const TARGET_BUCKETS: i64 = 150;

/// Ranges up to this length use one-second buckets.
pub const SHORT_RANGE_MS: i64 = 15_000;

const MIN_WIDTH_MS: i64 = 1_000;

/// Bucket width in milliseconds for the range `[from, to]`.
///
/// Ranges longer than 15 seconds are split into about 150 buckets with a
/// whole-second width (rounded half to even, at least one second). Shorter
/// ranges use one-second buckets.
#[must_use]
pub fn bucket_width_ms(time_from: i64, time_to: i64) -> i64 {
    let span_ms = time_to.saturating_sub(time_from);
    if span_ms <= SHORT_RANGE_MS {
        return MIN_WIDTH_MS;
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let seconds = (span_ms as f64 / 1000.0 / TARGET_BUCKETS as f64).round_ties_even() as i64;
    seconds.max(1) * 1000
}

/// Floors `ts` to the start of its bucket.
#[must_use]
pub fn bucket_start(ts: i64, width_ms: i64) -> i64 {
    ts.div_euclid(width_ms) * width_ms
}

/// Accumulates per-bucket counts for one graph request.
#[derive(Debug, Clone)]
pub struct Histogram {
    time_from: i64,
    time_to: i64,
    width_ms: i64,
    grouped: bool,
    axis: BTreeSet<i64>,
    series: BTreeMap<String, BTreeMap<i64, u64>>,
}

impl Histogram {
    /// Creates an empty histogram for `[time_from, time_to]`.
    #[must_use]
    pub fn new(time_from: i64, time_to: i64, grouped: bool) -> Self {
        Self {
            time_from,
            time_to,
            width_ms: bucket_width_ms(time_from, time_to),
            grouped,
            axis: BTreeSet::new(),
            series: BTreeMap::new(),
        }
    }

    /// Bucket width in milliseconds.
    #[must_use]
    pub fn width_ms(&self) -> i64 {
        self.width_ms
    }

    /// Counts one row at `ts` under `group`.
    ///
    /// Timestamps outside the requested range are ignored. For ungrouped
    /// histograms the group is ignored and everything lands in `Rows`.
    pub fn record(&mut self, ts: i64, group: &str) {
        if ts < self.time_from || ts > self.time_to {
            return;
        }
        self.record_bucket(bucket_start(ts, self.width_ms), group, 1);
    }

    /// Adds `count` rows to an already bucketed timestamp.
    pub fn record_bucket(&mut self, bucket: i64, group: &str, count: u64) {
        let key = if self.grouped { group } else { ROWS_GROUP };
        self.axis.insert(bucket);
        *self
            .series
            .entry(key.to_string())
            .or_default()
            .entry(bucket)
            .or_insert(0) += count;
    }

    /// Produces the response: a sorted axis including both range ends and
    /// one zero-filled count vector per series.
    #[must_use]
    pub fn finish(mut self) -> GraphDataResponse {
        self.axis.insert(self.time_from);
        self.axis.insert(self.time_to);

        let timestamps: Vec<i64> = self.axis.into_iter().collect();
        let mut total = 0;
        let data = self
            .series
            .into_iter()
            .map(|(key, counts)| {
                let values: Vec<u64> = timestamps
                    .iter()
                    .map(|ts| counts.get(ts).copied().unwrap_or(0))
                    .collect();
                total += values.iter().sum::<u64>();
                (key, values)
            })
            .collect();

        GraphDataResponse {
            timestamps,
            data,
            total,
            ..GraphDataResponse::default()
        }
    }
}
