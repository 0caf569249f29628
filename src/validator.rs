//! Pre-publish validation
//!
//! A record with any violation is skipped, never published. Validation
//! never aborts the batch.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::ValidationConfig;
use crate::types::ContentRecord;

/// A structural problem that blocks publishing
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    /// The record has no body in any locale
    #[error("body has no locales")]
    NoBody,

    /// A locale has a body but no title
    #[error("empty title for locale {locale}")]
    EmptyTitle {
        /// Locale code
        locale: String,
    },

    /// A body is shorter than the configured minimum
    #[error("below minimum length in {locale}: {words} words, minimum {minimum}")]
    BelowMinimumLength {
        /// Locale code
        locale: String,
        /// Words counted
        words: usize,
        /// Configured minimum
        minimum: usize,
    },

    /// Placeholder tokens survived assembly
    #[error("unresolved placeholders in {locale}: {}", .tokens.join(", "))]
    UnresolvedPlaceholders {
        /// Locale code
        locale: String,
        /// Leftover tokens
        tokens: Vec<String>,
    },

    /// Not every declared slot received a reference
    #[error("resolved {resolved} of {expected} slots")]
    ReferenceCountMismatch {
        /// Declared slots
        expected: usize,
        /// Slots with a reference
        resolved: usize,
    },

    /// Debug or internal text left in the body
    #[error("debug marker {marker:?} in {locale}")]
    DebugMarker {
        /// Locale code
        locale: String,
        /// Marker found
        marker: String,
    },
}

/// Checks an assembled record before it is published
#[derive(Clone, Debug)]
pub struct Validator {
    min_words: usize,
    debug_markers: Vec<String>,
}

impl Validator {
    /// Create a validator from configuration
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            min_words: config.min_words,
            debug_markers: config
                .debug_markers
                .iter()
                .map(|m| m.to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    /// Validate `record`, given how many slots were declared and how many
    /// received a reference (generated, cached or fallback)
    pub fn validate(
        &self,
        record: &ContentRecord,
        slot_count: usize,
        resolved_count: usize,
    ) -> Result<(), Vec<Violation>> {
        let mut violations = Vec::new();

        if record.body.is_empty() {
            violations.push(Violation::NoBody);
        }

        if resolved_count != slot_count {
            violations.push(Violation::ReferenceCountMismatch {
                expected: slot_count,
                resolved: resolved_count,
            });
        }

        for (locale, body) in &record.body {
            let title_missing = record
                .title
                .get(locale)
                .is_none_or(|title| title.trim().is_empty());
            if title_missing {
                violations.push(Violation::EmptyTitle {
                    locale: locale.clone(),
                });
            }

            let words = count_words(body);
            if words < self.min_words {
                violations.push(Violation::BelowMinimumLength {
                    locale: locale.clone(),
                    words,
                    minimum: self.min_words,
                });
            }

            let tokens: Vec<String> = placeholder_pattern()
                .find_iter(body)
                .map(|m| m.as_str().to_string())
                .collect();
            if !tokens.is_empty() {
                violations.push(Violation::UnresolvedPlaceholders {
                    locale: locale.clone(),
                    tokens,
                });
            }

            let lowered = body.to_lowercase();
            for marker in &self.debug_markers {
                if lowered.contains(marker.as_str()) {
                    violations.push(Violation::DebugMarker {
                        locale: locale.clone(),
                        marker: marker.clone(),
                    });
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

/// Count whitespace-separated words, ignoring image markup and HTML tags
pub fn count_words(body: &str) -> usize {
    let without_images = image_pattern().replace_all(body, " ");
    let without_tags = tag_pattern().replace_all(&without_images, " ");
    without_tags
        .split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .count()
}

// Literal patterns; compiling them cannot fail.
#[allow(clippy::expect_used)]
fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{[^}]*\}\}").expect("placeholder pattern is valid"))
}

#[allow(clippy::expect_used)]
fn image_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("image pattern is valid"))
}

#[allow(clippy::expect_used)]
fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]+>").expect("tag pattern is valid"))
}
