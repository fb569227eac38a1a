//! Severity classification.
//!
//! Derives a severity label from a log body using an ordered list of
//! extraction rules followed by an ordered list of remap rules. The
//! classifier never fails: anything it cannot classify is `UNKNOWN`.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Label used when no rule produces a severity.
pub const UNKNOWN_SEVERITY: &str = "UNKNOWN";

/// A rule that pulls a raw severity value out of a log body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExtractRule {
    /// Decode the body as JSON and follow `path` through nested objects.
    Json {
        /// Object keys to follow, outermost first.
        path: Vec<String>,
    },
    /// Search the body with a regular expression and take one capture group.
    Regex {
        /// The pattern to search for.
        pattern: String,
        /// Capture group to take; 0 is the whole match.
        #[serde(default)]
        group: usize,
        /// Match without regard to case.
        #[serde(default)]
        case_insensitive: bool,
    },
}

/// A rule that maps an extracted value onto a canonical label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapRule {
    /// Pattern that must match the whole extracted value.
    pub pattern: String,
    /// Label emitted when the pattern matches.
    pub value: String,
    /// Match without regard to case.
    #[serde(default)]
    pub case_insensitive: bool,
}

/// Severity rules as configured on a source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityRules {
    /// Extraction rules, tried in order until one succeeds.
    #[serde(default)]
    pub extract: Vec<ExtractRule>,
    /// Remap rules, tried in order against the extracted value.
    #[serde(default)]
    pub remap: Vec<RemapRule>,
}

#[derive(Debug)]
enum CompiledExtract {
    Json(Vec<String>),
    Regex { re: Regex, group: usize },
    // Kept so rule positions stay aligned; always fails.
    Invalid,
}

/// Severity rules with their regular expressions compiled.
#[derive(Debug)]
pub struct SeverityClassifier {
    extract: Vec<CompiledExtract>,
    remap: Vec<(Regex, String)>,
}

impl SeverityClassifier {
    /// Compiles `rules`.
    ///
    /// A regex rule whose pattern does not compile never matches, and remap
    /// rules with an empty pattern or value are ignored.
    #[must_use]
    pub fn new(rules: &SeverityRules) -> Self {
        let extract = rules
            .extract
            .iter()
            .map(|rule| match rule {
                ExtractRule::Json { path } => CompiledExtract::Json(path.clone()),
                ExtractRule::Regex {
                    pattern,
                    group,
                    case_insensitive,
                } => match build_regex(pattern, *case_insensitive) {
                    Ok(re) => CompiledExtract::Regex { re, group: *group },
                    Err(e) => {
                        tracing::warn!(pattern = %pattern, error = %e, "Ignoring invalid severity extract pattern");
                        CompiledExtract::Invalid
                    }
                },
            })
            .collect();

        let remap = rules
            .remap
            .iter()
            .filter(|rule| !rule.pattern.is_empty() && !rule.value.is_empty())
            .filter_map(|rule| {
                match build_regex(&format!("^(?:{})$", rule.pattern), rule.case_insensitive) {
                    Ok(re) => Some((re, rule.value.clone())),
                    Err(e) => {
                        tracing::warn!(pattern = %rule.pattern, error = %e, "Ignoring invalid severity remap pattern");
                        None
                    }
                }
            })
            .collect();

        Self { extract, remap }
    }

    /// Classifies a log body.
    ///
    /// The first extraction rule that yields a value wins. The value is then
    /// replaced by the first remap rule whose pattern matches it entirely, if
    /// any. Without a successful extraction the result is `UNKNOWN`.
    #[must_use]
    pub fn classify(&self, body: &str) -> String {
        let Some(extracted) = self.extract.iter().find_map(|rule| apply(rule, body)) else {
            return UNKNOWN_SEVERITY.to_string();
        };

        self.remap
            .iter()
            .find(|(re, _)| re.is_match(&extracted))
            .map_or(extracted, |(_, value)| value.clone())
    }
}

/// Classifies `body` with rules compiled on the spot.
///
/// Prefer [`SeverityClassifier`] when classifying many bodies with the same
/// rules.
#[must_use]
pub fn classify(body: &str, rules: &SeverityRules) -> String {
    SeverityClassifier::new(rules).classify(body)
}

fn build_regex(pattern: &str, case_insensitive: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
}

fn apply(rule: &CompiledExtract, body: &str) -> Option<String> {
    match rule {
        CompiledExtract::Json(path) => extract_json(body, path),
        CompiledExtract::Regex { re, group } => re
            .captures(body)
            .and_then(|caps| caps.get(*group))
            .map(|m| m.as_str().to_string()),
        CompiledExtract::Invalid => None,
    }
}

fn extract_json(body: &str, path: &[String]) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    let decoded: Value = serde_json::from_str(body).ok()?;
    let mut current = &decoded;
    for key in path {
        current = current.as_object()?.get(key)?;
    }
    Some(match current {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}
