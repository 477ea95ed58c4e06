// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration diagnostics.
//!
//! Turns figment errors into miette reports that point at the offending line
//! of `ferry.toml`. A misspelled key gets the closest key of its table as a
//! suggestion; a key written under the wrong table is pointed at the table
//! that owns it.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use std::fmt;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Minimum Jaro-Winkler similarity for a spelling suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// Keys accepted by each `ferry.toml` table.
pub const TABLES: &[(&str, &[&str])] = &[
    ("ingest", &["log_level", "shutdown_timeout_secs"]),
    (
        "session",
        &[
            "phone",
            "gateway_url",
            "ws_url",
            "api_token",
            "request_timeout_secs",
            "interactive",
        ],
    ),
    (
        "rate_limit",
        &[
            "window_secs",
            "max_calls_per_window",
            "auth_cost",
            "discovery_cost",
            "history_cost",
            "subscribe_cost",
        ],
    ),
    (
        "retry",
        &[
            "initial_delay_ms",
            "max_delay_ms",
            "backoff_factor",
            "jitter_percent",
            "max_attempts",
        ],
    ),
    ("discovery", &["interval_secs", "groups"]),
    ("discovery.groups", &["prefix", "tag"]),
    ("listener", &["queue_capacity", "resubscribe_delay_secs"]),
    (
        "backfill",
        &[
            "enabled",
            "concurrency",
            "batch_size",
            "max_history_messages",
            "max_attempts",
            "retry_delay_secs",
        ],
    ),
    (
        "publisher",
        &["dedup_window_secs", "prune_interval_secs", "max_publish_attempts"],
    ),
    ("storage", &["database_path", "output_path", "wal_mode"]),
    ("prometheus", &["enabled", "host", "port"]),
];

/// A hint attached to an unknown key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suggestion {
    /// A close spelling among the keys of the same table.
    Spelling(String),
    /// The key is valid, but only under these tables.
    OtherTable(Vec<String>),
}

impl fmt::Display for Suggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spelling(key) => write!(f, "did you mean `{key}`?"),
            Self::OtherTable(tables) => {
                let tables: Vec<String> = tables.iter().map(|t| format!("[{t}]")).collect();
                write!(f, "this key belongs under {}", tables.join(" or "))
            }
        }
    }
}

/// A configuration error with enough context for miette to render it.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("unknown key `{key}` in {}", table_label(.table))]
    #[diagnostic(
        code(ferry::config::unknown_key),
        help("{}", unknown_key_help(suggestion.as_ref(), valid_keys))
    )]
    UnknownKey {
        key: String,
        /// Dotted table path, `None` at the top level.
        table: Option<String>,
        suggestion: Option<Suggestion>,
        valid_keys: String,
        #[label("not a key of this table")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("invalid value for `{key}`: {detail}")]
    #[diagnostic(code(ferry::config::invalid_type), help("expected {expected}"))]
    InvalidType {
        /// Dotted key path, e.g. `backfill.concurrency`.
        key: String,
        detail: String,
        expected: String,
        #[label("this value")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// Only `[[discovery.groups]]` entries have required keys.
    #[error("missing key `{key}` in {}", table_label(.table))]
    #[diagnostic(
        code(ferry::config::missing_key),
        help("every {} entry needs `{key} = <value>`", table_label(table))
    )]
    MissingKey { key: String, table: Option<String> },

    #[error("validation error: {message}")]
    #[diagnostic(code(ferry::config::validation))]
    Validation { message: String },

    #[error("configuration error: {0}")]
    #[diagnostic(code(ferry::config::other))]
    Other(String),
}

fn table_label(table: &Option<String>) -> String {
    match table {
        Some(table) => format!("[{table}]"),
        None => "the top level".to_string(),
    }
}

fn unknown_key_help(suggestion: Option<&Suggestion>, valid_keys: &str) -> String {
    match suggestion {
        Some(suggestion) => format!("{suggestion} Valid keys here: {valid_keys}"),
        None => format!("valid keys here: {valid_keys}"),
    }
}

/// Convert every error inside a `figment::Error` into a [`ConfigError`].
///
/// `toml_sources` holds `(path, content)` pairs of the files that were
/// loaded; errors that came from one of them get a source span.
pub fn figment_to_config_errors(
    err: figment::Error,
    toml_sources: &[(String, String)],
) -> Vec<ConfigError> {
    use figment::error::Kind;

    err.into_iter()
        .map(|error| {
            let source = source_of(&error, toml_sources);
            match &error.kind {
                Kind::UnknownField(field, expected) => {
                    let table = table_path(&error.path);
                    let span = source
                        .and_then(|(_, content)| key_span(content, table.as_deref(), field));
                    ConfigError::UnknownKey {
                        key: field.clone(),
                        suggestion: suggest(field, table.as_deref(), expected),
                        table,
                        valid_keys: expected.join(", "),
                        span,
                        src: named(source, span),
                    }
                }
                Kind::MissingField(field) => ConfigError::MissingKey {
                    key: field.to_string(),
                    table: table_path(&error.path),
                },
                Kind::InvalidType(actual, expected) | Kind::InvalidValue(actual, expected) => {
                    let (table, key) = match error.path.split_last() {
                        Some((key, parents)) => (table_path(parents), key.clone()),
                        None => (None, String::new()),
                    };
                    let span =
                        source.and_then(|(_, content)| value_span(content, table.as_deref(), &key));
                    ConfigError::InvalidType {
                        key: table.as_ref().map_or_else(|| key.clone(), |t| format!("{t}.{key}")),
                        detail: format!("found {actual}, expected {expected}"),
                        expected: expected.clone(),
                        span,
                        src: named(source, span),
                    }
                }
                _ => ConfigError::Other(error.to_string()),
            }
        })
        .collect()
}

/// The loaded file an error came from, if it was a file.
fn source_of<'a>(
    error: &figment::Error,
    toml_sources: &'a [(String, String)],
) -> Option<(&'a str, &'a str)> {
    let path = match error.metadata.as_ref()?.source.as_ref()? {
        figment::Source::File(path) => path.display().to_string(),
        _ => return None,
    };
    toml_sources
        .iter()
        .find(|(p, _)| *p == path)
        .map(|(p, content)| (p.as_str(), content.as_str()))
}

fn named(source: Option<(&str, &str)>, span: Option<SourceSpan>) -> Option<NamedSource<String>> {
    span.and(source)
        .map(|(path, content)| NamedSource::new(path, content.to_string()))
}

/// Dotted table path of an error path, skipping array indices.
fn table_path(path: &[String]) -> Option<String> {
    let parts: Vec<&str> = path
        .iter()
        .map(String::as_str)
        .filter(|part| !part.chars().all(|c| c.is_ascii_digit()))
        .collect();
    (!parts.is_empty()).then(|| parts.join("."))
}

/// Suggest a fix for `unknown` found in `table`.
///
/// A key that exists verbatim under other tables wins over a spelling match,
/// since misplacing a key is the more common mistake.
pub fn suggest(unknown: &str, table: Option<&str>, valid_keys: &[&str]) -> Option<Suggestion> {
    let owners: Vec<String> = TABLES
        .iter()
        .filter(|(name, keys)| Some(*name) != table && keys.contains(&unknown))
        .map(|(name, _)| name.to_string())
        .collect();
    if !owners.is_empty() {
        return Some(Suggestion::OtherTable(owners));
    }
    closest_key(unknown, valid_keys).map(|key| Suggestion::Spelling(key.to_string()))
}

/// Closest key by Jaro-Winkler similarity, if any is close enough.
pub fn closest_key<'a>(unknown: &str, valid_keys: &[&'a str]) -> Option<&'a str> {
    valid_keys
        .iter()
        .map(|key| (*key, strsim::jaro_winkler(unknown, key)))
        .filter(|(_, score)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(key, _)| key)
}

/// Span of `key` on its assignment line inside `table`.
pub fn key_span(content: &str, table: Option<&str>, key: &str) -> Option<SourceSpan> {
    let (offset, _) = assignment(content, table, key)?;
    Some(SourceSpan::new(offset.into(), key.len()))
}

/// Span of the value assigned to `key` inside `table`.
pub fn value_span(content: &str, table: Option<&str>, key: &str) -> Option<SourceSpan> {
    let (offset, line) = assignment(content, table, key)?;
    let eq = line.find('=')?;
    let after = &line[eq + 1..];
    let value = after.trim_start();
    let start = offset + eq + 1 + (after.len() - value.len());
    Some(SourceSpan::new(start.into(), value.trim_end().len()))
}

/// Byte offset and text of the line assigning `key` under `table`.
///
/// Table headers (`[a]`, `[a.b]`, `[[a.b]]`) switch the current table, so a
/// key is only matched in the table it was reported for.
fn assignment<'a>(content: &'a str, table: Option<&str>, key: &str) -> Option<(usize, &'a str)> {
    let mut current: Option<&str> = None;
    let mut line_start = 0;
    for line in content.split_inclusive('\n') {
        let start = line_start;
        line_start += line.len();

        let code = line.split('#').next().unwrap_or("").trim();
        if let Some(header) = table_header(code) {
            current = Some(header);
            continue;
        }
        if current != table {
            continue;
        }
        let body = line.trim_start();
        if let Some(rest) = body.strip_prefix(key)
            && rest.trim_start().starts_with('=')
        {
            return Some((start + line.len() - body.len(), body));
        }
    }
    None
}

fn table_header(line: &str) -> Option<&str> {
    line.strip_prefix("[[")
        .and_then(|l| l.strip_suffix("]]"))
        .or_else(|| line.strip_prefix('[').and_then(|l| l.strip_suffix(']')))
        .map(str::trim)
}

/// Render every error to stderr with miette's graphical handler.
pub fn render_errors(errors: &[ConfigError]) {
    let handler = miette::GraphicalReportHandler::new();
    for error in errors {
        let mut buf = String::new();
        match handler.render_report(&mut buf, error as &dyn Diagnostic) {
            Ok(()) => eprint!("{buf}"),
            Err(_) => eprintln!("Error: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[backfill]
enabled = true # resume on start
concurrency = \"lots\"

[prometheus]
enabled = false

[[discovery.groups]]
prefx = \"archive\"
";

    fn slice(span: SourceSpan) -> &'static str {
        &SAMPLE[span.offset()..span.offset() + span.len()]
    }

    #[test]
    fn misspelled_key_suggests_same_table_key() {
        let keys = &["enabled", "concurrency", "batch_size", "max_attempts"];
        assert_eq!(
            suggest("batch_sise", Some("backfill"), keys),
            Some(Suggestion::Spelling("batch_size".into()))
        );
        assert_eq!(suggest("zzzzzz", Some("backfill"), keys), None);
    }

    #[test]
    fn misplaced_key_names_owning_tables() {
        let publisher = &["dedup_window_secs", "prune_interval_secs", "max_publish_attempts"];
        let hint = suggest("max_attempts", Some("publisher"), publisher).unwrap();
        assert_eq!(
            hint,
            Suggestion::OtherTable(vec!["retry".into(), "backfill".into()])
        );
        assert_eq!(hint.to_string(), "this key belongs under [retry] or [backfill]");
    }

    #[test]
    fn top_level_key_names_its_table() {
        let tables: Vec<&str> = TABLES.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            suggest("log_level", None, &tables),
            Some(Suggestion::OtherTable(vec!["ingest".into()]))
        );
        assert_eq!(
            suggest("backfil", None, &tables),
            Some(Suggestion::Spelling("backfill".into()))
        );
    }

    #[test]
    fn key_span_stays_inside_its_table() {
        let span = key_span(SAMPLE, Some("prometheus"), "enabled").unwrap();
        assert_eq!(slice(span), "enabled");
        assert!(span.offset() > SAMPLE.find("[prometheus]").unwrap());

        assert!(key_span(SAMPLE, Some("listener"), "enabled").is_none());
        assert!(key_span(SAMPLE, None, "enabled").is_none());
    }

    #[test]
    fn array_table_entries_are_located() {
        let span = key_span(SAMPLE, Some("discovery.groups"), "prefx").unwrap();
        assert_eq!(slice(span), "prefx");
    }

    #[test]
    fn value_span_covers_the_assigned_value() {
        let span = value_span(SAMPLE, Some("backfill"), "concurrency").unwrap();
        assert_eq!(slice(span), "\"lots\"");
    }

    #[test]
    fn table_path_skips_array_indices() {
        let path = vec!["discovery".to_string(), "groups".to_string(), "0".to_string()];
        assert_eq!(table_path(&path).as_deref(), Some("discovery.groups"));
        assert_eq!(table_path(&[]), None);
    }
}
