//! Time bounds accepted on the command line.
//!
//! A bound is `now`, `now-<n><unit>` with unit `s`, `m`, `h` or `d`, or an
//! absolute epoch timestamp in milliseconds.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;

static RELATIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^now-(\d+)([smhd])$").expect("valid relative time pattern"));

/// A time bound, resolved against the current time when the command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBound {
    /// The current time.
    Now,
    /// This many milliseconds before now.
    Ago(i64),
    /// An absolute epoch timestamp in milliseconds.
    Epoch(i64),
}

impl TimeBound {
    /// Epoch milliseconds of the bound relative to `now`.
    pub fn resolve(self, now: DateTime<Utc>) -> i64 {
        let now_ms = now.timestamp_millis();
        match self {
            Self::Now => now_ms,
            Self::Ago(ms) => now_ms.saturating_sub(ms),
            Self::Epoch(ms) => ms,
        }
    }
}

impl FromStr for TimeBound {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input == "now" {
            return Ok(Self::Now);
        }
        if let Some(captures) = RELATIVE.captures(input) {
            let amount: i64 = captures[1]
                .parse()
                .map_err(|_| format!("Relative time out of range: '{input}'"))?;
            let unit_ms = match &captures[2] {
                "s" => 1_000,
                "m" => 60_000,
                "h" => 3_600_000,
                _ => 86_400_000,
            };
            return amount
                .checked_mul(unit_ms)
                .map(Self::Ago)
                .ok_or_else(|| format!("Relative time out of range: '{input}'"));
        }
        input
            .parse::<i64>()
            .map(Self::Epoch)
            .map_err(|_| format!("Expected 'now', 'now-<n>[smhd]' or epoch milliseconds, got '{input}'"))
    }
}
