//! Advisory denylist filter for user snippets.
//!
//! The filter is a deterrent, not a security boundary. It performs a
//! case-insensitive substring match and nothing else, so obfuscated code
//! (string concatenation, aliasing, `getattr` tricks) passes straight through
//! and innocent code that happens to contain a pattern is rejected. Callers
//! must not present a passing verdict as an isolation guarantee.

use serde::{Deserialize, Serialize};

/// Patterns rejected by default: process access, dynamic evaluation, raw
/// file handles and network clients.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "import os",
    "__import__",
    "eval(",
    "exec(",
    "open(",
    "system(",
    "subprocess",
    "import socket",
    "import requests",
    "import urllib",
];

/// Outcome of a denylist check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    /// Whether the snippet may be submitted.
    pub allowed: bool,
    /// The first denylist pattern found, in denylist order.
    pub matched_pattern: Option<String>,
}

impl SafetyVerdict {
    fn allow() -> Self {
        Self {
            allowed: true,
            matched_pattern: None,
        }
    }

    fn deny(pattern: &str) -> Self {
        Self {
            allowed: false,
            matched_pattern: Some(pattern.to_string()),
        }
    }
}

/// Case-insensitive substring denylist.
#[derive(Debug, Clone)]
pub struct SafetyFilter {
    /// Patterns, lowercased at construction.
    patterns: Vec<String>,
}

impl SafetyFilter {
    /// Create a filter from a custom denylist. Empty patterns are ignored.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| p.as_ref().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { patterns }
    }

    /// The active patterns, lowercased.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Check a snippet against the denylist.
    pub fn check(&self, snippet: &str) -> SafetyVerdict {
        let lowered = snippet.to_lowercase();
        match self.patterns.iter().find(|p| lowered.contains(p.as_str())) {
            Some(pattern) => {
                tracing::warn!(pattern = %pattern, "Snippet matched denylist pattern");
                SafetyVerdict::deny(pattern)
            }
            None => SafetyVerdict::allow(),
        }
    }
}

impl Default for SafetyFilter {
    fn default() -> Self {
        Self::new(DEFAULT_DENYLIST)
    }
}
