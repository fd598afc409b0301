// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Figment-to-miette error bridge with "did you mean" suggestions.
//!
//! Unknown keys are matched against the section's valid keys using
//! Jaro-Winkler similarity; when the offending file is known, the key is
//! located in the TOML source so miette can underline it.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Minimum Jaro-Winkler similarity score to suggest a correction.
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// A configuration error with rich diagnostic information.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// An unknown key was found in the configuration.
    #[error("unknown configuration key `{key}`")]
    #[diagnostic(
        code(cairn::config::unknown_key),
        help("{}", unknown_key_help(suggestion.as_deref(), valid_keys))
    )]
    UnknownKey {
        key: String,
        suggestion: Option<String>,
        valid_keys: String,
        #[label("this key is not recognized")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A configuration value has the wrong type.
    #[error("invalid type for key `{key}`: {detail}")]
    #[diagnostic(code(cairn::config::invalid_type), help("expected {expected}"))]
    InvalidType {
        key: String,
        detail: String,
        expected: String,
    },

    /// A required configuration key is missing.
    #[error("missing required key `{key}`")]
    #[diagnostic(
        code(cairn::config::missing_key),
        help("add `{key} = <value>` to your cairn.toml")
    )]
    MissingKey { key: String },

    /// A value failed semantic validation.
    #[error("validation error: {message}")]
    #[diagnostic(code(cairn::config::validation))]
    Validation { message: String },

    /// Catch-all for other configuration errors.
    #[error("configuration error: {0}")]
    #[diagnostic(code(cairn::config::other))]
    Other(String),
}

fn unknown_key_help(suggestion: Option<&str>, valid_keys: &str) -> String {
    match suggestion {
        Some(s) => format!("did you mean `{s}`? Valid keys: {valid_keys}"),
        None => format!("valid keys: {valid_keys}"),
    }
}

/// Convert a `figment::Error` (which may hold several errors) into diagnostics.
///
/// `toml_sources` holds `(path, content)` pairs used to resolve source spans.
pub fn figment_to_config_errors(
    err: figment::Error,
    toml_sources: &[(String, String)],
) -> Vec<ConfigError> {
    use figment::error::Kind;

    err.into_iter()
        .map(|error| {
            let section: Vec<String> = error.path.iter().map(|s| s.to_string()).collect();
            match &error.kind {
                Kind::UnknownField(field, expected) => {
                    let suggestion = suggest_key(field, expected);
                    let (span, src) = source_path(&error)
                        .and_then(|path| {
                            toml_sources.iter().find(|(p, _)| *p == path)
                        })
                        .and_then(|(path, content)| {
                            let offset = find_key_offset(content, &section, field)?;
                            Some((
                                SourceSpan::new(offset.into(), field.len()),
                                NamedSource::new(path, content.clone()),
                            ))
                        })
                        .map_or((None, None), |(span, src)| (Some(span), Some(src)));
                    ConfigError::UnknownKey {
                        key: field.clone(),
                        suggestion,
                        valid_keys: expected.join(", "),
                        span,
                        src,
                    }
                }
                Kind::MissingField(field) => ConfigError::MissingKey {
                    key: field.to_string(),
                },
                Kind::InvalidType(actual, expected) => ConfigError::InvalidType {
                    key: section.join("."),
                    detail: format!("found {actual}, expected {expected}"),
                    expected: expected.to_string(),
                },
                _ => ConfigError::Other(error.to_string()),
            }
        })
        .collect()
}

fn source_path(error: &figment::Error) -> Option<String> {
    match error.metadata.as_ref()?.source.as_ref()? {
        figment::Source::File(path) => Some(path.display().to_string()),
        _ => None,
    }
}

/// Byte offset of `field` in TOML `content`, searching inside the table named
/// by `section` (the top level when `section` is empty).
pub fn find_key_offset(content: &str, section: &[String], field: &str) -> Option<usize> {
    let wanted_table = section.join(".");
    let mut current_table = String::new();
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if let Some(header) = trimmed
            .strip_prefix('[')
            .and_then(|rest| rest.split(']').next())
        {
            current_table = header.trim().to_string();
        } else if current_table == wanted_table
            && let Some(after) = trimmed.strip_prefix(field)
            && after.trim_start().starts_with('=')
        {
            return Some(offset + (line.len() - trimmed.len()));
        }
        offset += line.len();
    }
    None
}

/// Suggest the closest valid key, if any is similar enough.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|key| (strsim::jaro_winkler(unknown, key), *key))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

/// Render diagnostics to stderr using miette's graphical handler.
pub fn render_errors(errors: &[ConfigError]) {
    use miette::GraphicalReportHandler;

    let handler = GraphicalReportHandler::new();
    for error in errors {
        let mut buf = String::new();
        let diagnostic: &dyn Diagnostic = error;
        if handler.render_report(&mut buf, diagnostic).is_ok() {
            eprint!("{buf}");
        } else {
            eprintln!("Error: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggests_close_key() {
        let valid = &["match_threshold"];
        assert_eq!(
            suggest_key("match_treshold", valid),
            Some("match_threshold".to_string())
        );
    }

    #[test]
    fn picks_best_of_several_candidates() {
        let valid = &["inactive_days", "archive_merged"];
        assert_eq!(
            suggest_key("archive_merge", valid),
            Some("archive_merged".to_string())
        );
    }

    #[test]
    fn no_suggestion_for_distant_typo() {
        let valid = &["level"];
        assert_eq!(suggest_key("zzzzzz", valid), None);
    }

    #[test]
    fn finds_key_inside_its_table_only() {
        let content = "[merge]\nlevel = 1\n[logging]\nlevel = \"info\"\n";
        let offset = find_key_offset(content, &["logging".to_string()], "level").unwrap();
        assert_eq!(offset, content.rfind("level").unwrap());
    }

    #[test]
    fn top_level_key_offset() {
        let content = "bogus = 1\n[merge]\n";
        assert_eq!(find_key_offset(content, &[], "bogus"), Some(0));
    }

    #[test]
    fn unknown_field_becomes_unknown_key_with_suggestion() {
        let err = crate::loader::load_config_from_str("[lifecycle]\ninactive_dayz = 3\n")
            .unwrap_err();
        let errors = figment_to_config_errors(err, &[]);
        match &errors[0] {
            ConfigError::UnknownKey {
                key, suggestion, ..
            } => {
                assert_eq!(key, "inactive_dayz");
                assert_eq!(suggestion.as_deref(), Some("inactive_days"));
            }
            other => panic!("expected UnknownKey, got {other:?}"),
        }
    }
}
