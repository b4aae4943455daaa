//! Detection rules and the findings they produce.
//!
//! - [`patterns`] compiles rule specifications (and the built-in defaults)
//!   into a [`RuleSet`].
//! - [`engine`] evaluates a rule set against normalized text and reports each
//!   new finding exactly once.

pub mod engine;
pub mod patterns;

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Severity tag attached to a rule and to every finding it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Parse a configured level (`"low"`, `"medium"`, `"high"`, any case).
    pub fn parse(level: &str) -> Option<Self> {
        match level.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a rule inspects text. Only regular-expression rules exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Pattern,
}

/// A compiled detection rule. Immutable once built.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub kind: RuleKind,
    pub matcher: Regex,
    /// Part of the response the rule targets; only `"body"` is inspected.
    pub source: String,
    pub severity: Severity,
    pub enabled: bool,
}

/// Ordered, read-only collection of rules.
///
/// Shared between scan tasks as `Arc<RuleSet>`; a reload swaps in a new set
/// rather than mutating this one.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Enabled rules in configuration order.
    pub fn enabled(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.enabled)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }
}

/// A single piece of sensitive data found in a response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub matched_text: String,
    pub rule_name: String,
    pub locator: String,
    pub severity: Severity,
}

impl Finding {
    /// The report line handed to the logger.
    pub fn log_line(&self) -> String {
        format!(
            "{} found information {} : {}",
            self.locator, self.rule_name, self.matched_text
        )
    }
}
