//! Query sanitization and prompt-injection detection
//!
//! Every user query passes through here before touching the embedding
//! provider or the LLM. Normalization runs first so detection sees the
//! same text the model would.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;
use unicode_normalization::UnicodeNormalization;

use crate::error::{Error, Result};

/// Chat-markup role tokens that only appear in injection payloads.
static ROLE_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\|im_(start|end)\|>|\[/?(system|assistant|inst)\]|</?(system|assistant)>")
        .expect("role tag pattern is valid")
});

/// Phrases that try to override or replace the standing instructions.
const INJECTION_PATTERNS: &[&str] = &[
    "ignore previous",
    "ignore above",
    "ignore all previous",
    "disregard previous",
    "forget previous",
    "system:",
    "system prompt",
    "assistant:",
    "[system]",
    "[assistant]",
    "new instructions",
    "new directive",
    "override instructions",
    "bypass instructions",
    "pretend you are",
    "act as if",
    "roleplay as",
    "you are now",
    "from now on",
    "reveal all",
    "show all messages",
    "dump all",
    "list everything",
    "output everything",
    "print all",
    "display all data",
];

/// Verbs that suggest pushing data somewhere it shouldn't go.
const EXFILTRATION_PATTERNS: &[&str] = &[
    "send to url",
    "post to http",
    "webhook",
    "curl ",
    "fetch(",
    "xmlhttprequest",
    "external api",
    "send email",
    "base64 encode",
    "encode all",
];

/// Longest permitted run of one repeated character.
const MAX_CHAR_RUN: usize = 50;

/// Above this ratio of non-alphanumeric characters the query is rejected.
const SPECIAL_CHAR_RATIO: f32 = 0.5;

/// Normalizes queries and screens them for injection attempts.
#[derive(Debug, Clone)]
pub struct QuerySanitizer {
    max_length: usize,
}

impl QuerySanitizer {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Normalize and validate a raw query.
    ///
    /// Returns the cleaned text, or `InvalidQuery` / `SuspiciousQuery`.
    /// A positive injection match is logged as a security event before the
    /// error is returned; callers decide whether to soft-fail.
    pub fn sanitize(&self, tenant_id: i64, raw: &str) -> Result<String> {
        let cleaned: String = raw
            .nfkc()
            .filter(|c| !c.is_control())
            .collect::<String>()
            .trim()
            .to_string();

        if cleaned.is_empty() {
            return Err(Error::InvalidQuery("query is empty".to_string()));
        }

        let length = cleaned.chars().count();
        if length > self.max_length {
            return Err(Error::InvalidQuery(format!(
                "query length {} exceeds maximum {}",
                length, self.max_length
            )));
        }

        if let Some(pattern) = detect_injection(&cleaned) {
            let preview: String = cleaned.chars().take(100).collect();
            warn!(
                tenant_id,
                pattern = %pattern,
                query = %preview,
                "security event: query flagged as injection attempt"
            );
            return Err(Error::SuspiciousQuery { pattern });
        }

        Ok(cleaned)
    }
}

/// Check a normalized query against the known injection heuristics.
///
/// Returns the matched pattern label, if any.
pub fn detect_injection(query: &str) -> Option<String> {
    let lower = query.to_lowercase();

    for pattern in INJECTION_PATTERNS {
        if lower.contains(pattern) {
            return Some((*pattern).to_string());
        }
    }

    for pattern in EXFILTRATION_PATTERNS {
        if lower.contains(pattern) {
            return Some(format!("exfiltration:{}", pattern.trim()));
        }
    }

    if ROLE_TAG_RE.is_match(query) {
        return Some("role_markup".to_string());
    }

    if let Some(c) = longest_run(query) {
        return Some(format!("repeated_chars:{c}"));
    }

    let total = query.chars().count();
    if total > 0 {
        let special = query
            .chars()
            .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
            .count();
        if special as f32 / total as f32 > SPECIAL_CHAR_RATIO {
            return Some("excessive_special_chars".to_string());
        }
    }

    None
}

/// First character repeated more than `MAX_CHAR_RUN` times in a row.
fn longest_run(text: &str) -> Option<char> {
    let mut run_char = None;
    let mut run_len = 0usize;
    for c in text.chars() {
        if Some(c) == run_char {
            run_len += 1;
            if run_len > MAX_CHAR_RUN {
                return Some(c);
            }
        } else {
            run_char = Some(c);
            run_len = 1;
        }
    }
    None
}
