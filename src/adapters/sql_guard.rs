//! Lexical gate for submitted statements
//!
//! The checks are heuristics over raw text. They narrow the attack surface but are
//! not a parser: statements like `WHERE state = 'oregon'` are rejected (quote followed
//! by `or`), while injections that avoid the listed shapes pass.

use regex::Regex;
use std::borrow::Cow;
use tracing::warn;

use crate::domain::{FederationError, StatementKind};

const COMMENT_MARKERS: [&str; 3] = ["/*", "*/", "--"];

pub struct SqlGuard {
    allowed: Vec<String>,
    quoted_keyword: Regex,
    tautology: Regex,
}

impl SqlGuard {
    /// Build a guard for the given leading keywords. Blank entries are ignored and
    /// matching is case-insensitive.
    pub fn new<I, S>(allowed: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = allowed
            .into_iter()
            .map(|op| op.as_ref().trim().to_ascii_uppercase())
            .filter(|op| !op.is_empty())
            .collect();

        Ok(Self {
            allowed,
            quoted_keyword: Regex::new(
                r"(?i)'\s*(or|and|union|select|insert|update|delete|drop|create|alter)",
            )?,
            tautology: Regex::new(r"(1\s*=\s*1|0\s*=\s*0)")?,
        })
    }

    pub fn allowed_operations(&self) -> &[String] {
        &self.allowed
    }

    /// Validate `statement` and return its classification.
    pub fn validate(&self, statement: &str) -> Result<StatementKind, FederationError> {
        self.check(statement).map_err(|reason| {
            warn!(reason = %reason, "statement rejected");
            FederationError::InvalidStatement(reason)
        })?;
        Ok(StatementKind::classify(statement))
    }

    fn check(&self, statement: &str) -> Result<(), String> {
        let trimmed = statement.trim();
        if trimmed.is_empty() {
            return Err("statement is empty".to_string());
        }

        let upper = trimmed.to_ascii_uppercase();
        if !self.allowed.iter().any(|op| upper.starts_with(op.as_str())) {
            return Err(format!(
                "statement must start with one of: {}",
                self.allowed.join(", ")
            ));
        }

        if COMMENT_MARKERS.iter().any(|marker| trimmed.contains(marker)) {
            return Err("comments are not allowed".to_string());
        }

        let body = trimmed.strip_suffix(';').unwrap_or(trimmed);
        if body.contains(';') {
            return Err("multiple statements are not allowed".to_string());
        }

        if self.quoted_keyword.is_match(trimmed) {
            return Err("quoted keyword pattern is not allowed".to_string());
        }

        if self.tautology.is_match(trimmed) {
            return Err("always-true comparison is not allowed".to_string());
        }

        Ok(())
    }

    /// Append `LIMIT cap` to row-returning statements that carry no limit of their own.
    pub fn apply_row_cap(statement: &str, kind: StatementKind, cap: Option<u64>) -> Cow<'_, str> {
        match cap {
            Some(limit)
                if kind.accepts_row_cap() && !statement.to_ascii_lowercase().contains("limit") =>
            {
                let trimmed = statement.trim_end();
                let body = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
                Cow::Owned(format!("{} LIMIT {}", body, limit))
            }
            _ => Cow::Borrowed(statement),
        }
    }
}
