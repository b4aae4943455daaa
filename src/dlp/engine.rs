//! Pattern filter engine.
//!
//! Runs every enabled rule over a body's text and reports each match whose
//! `(matched text, locator)` pair has not been reported before, by any rule.
//! When several rules match the same text at the same locator, the first one
//! in configuration order is recorded as its owner.

use std::sync::Arc;

use tracing::debug;

use super::{Finding, RuleSet};
use crate::dedup::{FindingIndex, FindingKey};
use crate::sink::FindingSink;

pub struct FilterEngine {
    index: Arc<FindingIndex>,
    sink: Arc<dyn FindingSink>,
}

impl FilterEngine {
    pub fn new(index: Arc<FindingIndex>, sink: Arc<dyn FindingSink>) -> Self {
        Self { index, sink }
    }

    /// Evaluate `rules` against `text`, reporting and returning the new findings.
    pub fn evaluate(&self, text: &str, locator: &str, rules: &RuleSet) -> Vec<Finding> {
        let mut emitted = Vec::new();
        for rule in rules.enabled() {
            for mat in rule.matcher.find_iter(text) {
                let key = FindingKey::new(mat.as_str(), locator);
                if !self.index.claim(key, &rule.name) {
                    continue;
                }
                let finding = Finding {
                    matched_text: mat.as_str().to_string(),
                    rule_name: rule.name.clone(),
                    locator: locator.to_string(),
                    severity: rule.severity,
                };
                self.sink.report(&finding);
                emitted.push(finding);
            }
        }
        debug!(locator, findings = emitted.len(), "Rules evaluated");
        emitted
    }

    pub fn index(&self) -> &FindingIndex {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterSpec;
    use crate::dlp::Severity;
    use crate::sink::MemorySink;

    fn spec(name: &str, regex: &str, level: &str, enabled: bool) -> FilterSpec {
        FilterSpec {
            filter_name: name.to_string(),
            filter_type: "pattern".to_string(),
            filter_regex: regex.to_string(),
            filter_resource: "body".to_string(),
            filter_level: level.to_string(),
            filter_enabled: enabled,
        }
    }

    fn engine() -> (FilterEngine, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let engine = FilterEngine::new(Arc::new(FindingIndex::default()), sink.clone());
        (engine, sink)
    }

    #[test]
    fn reports_every_distinct_match() {
        let (engine, sink) = engine();
        let rules = RuleSet::from_specs(&[spec("digits", r"\d{3}", "high", true)]);
        let found = engine.evaluate("a 123 b 456 c 123", "http://x/y", &rules);

        let texts: Vec<&str> = found.iter().map(|f| f.matched_text.as_str()).collect();
        assert_eq!(texts, vec!["123", "456"]);
        assert_eq!(sink.len(), 2);
        assert!(found.iter().all(|f| f.severity == Severity::High));
    }

    #[test]
    fn two_rules_same_text_report_once() {
        let (engine, sink) = engine();
        let rules = RuleSet::from_specs(&[
            spec("first", r"secret", "low", true),
            spec("second", r"s\w+t", "high", true),
        ]);
        let found = engine.evaluate("the secret", "http://x/y", &rules);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].rule_name, "first");
        assert_eq!(sink.len(), 1);
        assert_eq!(
            engine
                .index()
                .owner(&FindingKey::new("secret", "http://x/y"))
                .as_deref(),
            Some("first")
        );
    }

    #[test]
    fn repeated_evaluation_reports_nothing_new() {
        let (engine, sink) = engine();
        let rules = RuleSet::from_specs(&[spec("email", r"\w+@\w+\.com", "low", true)]);
        assert_eq!(engine.evaluate("a@b.com", "http://x/y", &rules).len(), 1);
        assert!(engine.evaluate("a@b.com", "http://x/y", &rules).is_empty());
        // Same text at another locator is a new finding.
        assert_eq!(engine.evaluate("a@b.com", "http://x/z", &rules).len(), 1);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let (engine, sink) = engine();
        let rules = RuleSet::from_specs(&[spec("off", r"secret", "low", false)]);
        assert!(engine.evaluate("secret", "http://x/y", &rules).is_empty());
        assert!(sink.is_empty());
        assert!(engine.index().is_empty());
    }

    #[test]
    fn finding_set_is_order_independent() {
        let text = "token=abc user=abc";
        let a = RuleSet::from_specs(&[
            spec("r1", r"abc", "low", true),
            spec("r2", r"token=\w+", "low", true),
        ]);
        let b = RuleSet::from_specs(&[
            spec("r2", r"token=\w+", "low", true),
            spec("r1", r"abc", "low", true),
        ]);

        let (e1, _) = engine();
        let (e2, _) = engine();
        let mut t1: Vec<String> = e1
            .evaluate(text, "l", &a)
            .into_iter()
            .map(|f| f.matched_text)
            .collect();
        let mut t2: Vec<String> = e2
            .evaluate(text, "l", &b)
            .into_iter()
            .map(|f| f.matched_text)
            .collect();
        t1.sort();
        t2.sort();
        assert_eq!(t1, t2);
    }
}
