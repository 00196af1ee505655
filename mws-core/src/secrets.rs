//! Sensitive-value redaction
//!
//! Child executors pass engine output through a [`Redactor`] before logging it,
//! so credentials that end up in plan or apply output never reach the logs.

use regex::Regex;
use std::sync::Arc;

/// Replacement text for redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// Function applied to any text that may contain sensitive values.
pub type Redactor = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Redactor that returns its input unchanged.
pub fn passthrough() -> Redactor {
    Arc::new(|text: &str| text.to_string())
}

/// Redact every occurrence of the given literal values.
///
/// Empty values are ignored; longer values are replaced first so a secret
/// that contains another secret is still fully hidden.
pub fn redact_values<I, S>(values: I) -> Redactor
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut values: Vec<String> = values
        .into_iter()
        .map(Into::into)
        .filter(|v| !v.is_empty())
        .collect();
    values.sort_by_key(|v| std::cmp::Reverse(v.len()));

    Arc::new(move |text: &str| {
        values
            .iter()
            .fold(text.to_string(), |acc, value| acc.replace(value.as_str(), REDACTED))
    })
}

/// Redact every match of the given patterns.
pub fn redact_patterns(patterns: Vec<Regex>) -> Redactor {
    Arc::new(move |text: &str| {
        patterns.iter().fold(text.to_string(), |acc, pattern| {
            pattern.replace_all(&acc, REDACTED).into_owned()
        })
    })
}
