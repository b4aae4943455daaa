//! Rule compilation and the built-in default rule set.
//!
//! The defaults target what typically leaks from web applications into
//! response bodies:
//!
//! | Rule | Looks for |
//! |------|-----------|
//! | `cloud-key` | `access_key_id`/`access-key-secret` names, Aliyun `LTAI...` key IDs |
//! | `windows file/dir Path` | absolute Windows paths such as `C:\inetpub\...` |
//! | `Password Field` | `password: "..."`-style assignments in JS/JSON |
//! | `username field` | `username`/`account`/`createdBy`-style assignments |
//! | `email field` | email addresses |
//! | `chinese phone number` | mainland China mobile numbers |
//! | `sensitive data` | `key`/`secret`/`token`/`auth`/... assignments |
//!
//! Word and digit classes in the built-in rules are spelled out as ASCII
//! ranges. `\w` and `\d` are Unicode-aware in the `regex` crate, so
//! `[^\w]` would refuse a CJK character as the delimiter before a phone
//! number and `[\.\w]{1,10}` would swallow CJK text into a field name.

use regex::Regex;
use tracing::warn;

use super::{Rule, RuleKind, RuleSet, Severity};
use crate::config::FilterSpec;
use crate::error::{RespGuardError, Result};

const DEFAULT_FILTERS: &[(&str, &str)] = &[
    (
        "cloud-key",
        r"(((access)([\-_])(key)([\-_])(id|secret))|(LTAI[a-z0-9]{12,20}))",
    ),
    (
        "windows file/dir Path",
        r"[^0-9A-Za-z_]([a-zA-Z]:\\\\?(?:[^<>:/\\|?*]+\\\\?)*)([^<>:/\\|?*]+(?:\.[^<>:/\\|?*]+)?)",
    ),
    (
        "Password Field",
        r#"(((|\\)(|'|")(|[\.0-9A-Za-z_]{1,10})([p](ass|wd|asswd|assword))(|[\.0-9A-Za-z_]{1,10})(|\\)(|'|")( |)(:|[=]{1,3}|![=]{1,2}|[\)]{0,1}\.val\()( |)(|\\)('|")([^'"]+?)(|\\)('|")(|,|\)))|((|\\)('|")([^'"]+?)(|\\)('|")(|\\)(|'|")( |)(:|[=]{1,3}|![=]{1,2})( |)(|[\.0-9A-Za-z_]{1,10})([p](ass|wd|asswd|assword))(|[\.0-9A-Za-z_]{1,10})(|\\)(|'|")))"#,
    ),
    (
        "username field",
        r#"(((|\\)(|'|")(|[\.0-9A-Za-z_]{1,10})(([u](ser|name|sername))|(account)|((((create|update)((d|r)|(by|on|at)))|(creator))))(|[\.0-9A-Za-z_]{1,10})(|\\)(|'|")( |)(:|=|!=|[\)]{0,1}\.val\()( |)(|\\)('|")([^'"]+?)(|\\)('|")(|,|\)))|((|\\)('|")([^'"]+?)(|\\)('|")(|\\)(|'|")( |)(:|[=]{1,3}|![=]{1,2})( |)(|[\.0-9A-Za-z_]{1,10})(([u](ser|name|sername))|(account)|((((create|update)((d|r)|(by|on|at)))|(creator))))(|[\.0-9A-Za-z_]{1,10})(|\\)(|'|")))"#,
    ),
    (
        "email field",
        r"(([a-z0-9]+[_|\.])*[a-z0-9]+@([a-z0-9]+[-|_|\.])*[a-z0-9]+\.([a-z]{2,5}(?:\.[a-z]{2,5})*))",
    ),
    (
        "chinese phone number",
        r"[^0-9A-Za-z_]((?:(?:\+|0{0,2})86)?1(?:(?:3[0-9])|(?:4[5-79])|(?:5[0-35-9])|(?:6[5-7])|(?:7[0-8])|(?:8[0-9])|(?:9[189]))[0-9]{8})[^0-9A-Za-z_]",
    ),
    (
        "sensitive data",
        r#"(((\[)?('|")?([\.0-9A-Za-z_]{0,10})(key|secret|token|config|auth|access|admin|ticket)([\.0-9A-Za-z_]{0,10})('|")?(\])?( |)(:|=|!=|[\)]{0,1}\.val\()( |)('|")([^'"]+?)(\('|")(|,|\)))|((|\\)('|")([^'"]+?)(|\\)('|")(|\\)(|'|")( |)(:|[=]{1,3}|![=]{1,2})( |)(|[\.0-9A-Za-z_]{1,10})(key|secret|token|config|auth|access|admin|ticket)(|[\.0-9A-Za-z_]{1,10})(|\\)(|'|")))"#,
    ),
];

/// Specifications of the built-in rules, all body/low/enabled.
pub fn default_specs() -> Vec<FilterSpec> {
    DEFAULT_FILTERS
        .iter()
        .map(|(name, regex)| FilterSpec {
            filter_name: name.to_string(),
            filter_type: "pattern".to_string(),
            filter_regex: regex.to_string(),
            filter_resource: "body".to_string(),
            filter_level: "low".to_string(),
            filter_enabled: true,
        })
        .collect()
}

/// Compile one rule specification.
///
/// `"reg"` is accepted as a synonym for `"pattern"`. An unknown level falls
/// back to [`Severity::Low`] with a warning.
pub fn compile(spec: &FilterSpec) -> Result<Rule> {
    let kind = match spec.filter_type.trim().to_ascii_lowercase().as_str() {
        "pattern" | "reg" | "regex" => RuleKind::Pattern,
        other => {
            return Err(RespGuardError::UnsupportedRule {
                name: spec.filter_name.clone(),
                reason: format!("unknown filter type '{}'", other),
            })
        }
    };

    let matcher = Regex::new(&spec.filter_regex).map_err(|source| RespGuardError::RuleCompile {
        name: spec.filter_name.clone(),
        source,
    })?;

    let severity = Severity::parse(&spec.filter_level).unwrap_or_else(|| {
        warn!(
            "Filter {} has unknown level '{}', using low",
            spec.filter_name, spec.filter_level
        );
        Severity::Low
    });

    Ok(Rule {
        name: spec.filter_name.clone(),
        kind,
        matcher,
        source: spec.filter_resource.clone(),
        severity,
        enabled: spec.filter_enabled,
    })
}

impl RuleSet {
    /// Compile `specs` in order, skipping (and logging) any that fail.
    pub fn from_specs(specs: &[FilterSpec]) -> Self {
        let rules = specs
            .iter()
            .filter_map(|spec| match compile(spec) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!("Skipping filter: {}", e);
                    None
                }
            })
            .collect();
        Self::new(rules)
    }

    /// The built-in rule set.
    pub fn defaults() -> Self {
        Self::from_specs(&default_specs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, regex: &str) -> FilterSpec {
        FilterSpec {
            filter_name: name.to_string(),
            filter_type: "pattern".to_string(),
            filter_regex: regex.to_string(),
            filter_resource: "body".to_string(),
            filter_level: "medium".to_string(),
            filter_enabled: true,
        }
    }

    fn matches(rule_name: &str, text: &str) -> Vec<String> {
        let rules = RuleSet::defaults();
        let rule = rules.get(rule_name).expect("built-in rule");
        rule.matcher
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    #[test]
    fn all_defaults_compile() {
        let rules = RuleSet::defaults();
        assert_eq!(rules.len(), DEFAULT_FILTERS.len());
        assert!(rules.iter().all(|r| r.enabled && r.severity == Severity::Low));
    }

    #[test]
    fn default_email_rule() {
        assert_eq!(matches("email field", "contact: a@b.com"), vec!["a@b.com"]);
        assert_eq!(
            matches("email field", "mail john.doe@corp.example.com now"),
            vec!["john.doe@corp.example.com"]
        );
    }

    #[test]
    fn default_cloud_key_rule() {
        assert_eq!(
            matches("cloud-key", "var k = 'LTAI4fabcdefghij1234';"),
            vec!["LTAI4fabcdefghij1234"]
        );
        assert_eq!(matches("cloud-key", "access_key_id=x"), vec!["access_key_id"]);
    }

    #[test]
    fn default_phone_rule_includes_delimiters() {
        assert_eq!(
            matches("chinese phone number", "tel: 13800138000,"),
            vec![" 13800138000,"]
        );
        assert!(matches("chinese phone number", "id=12345678901").is_empty());
    }

    #[test]
    fn default_phone_rule_after_chinese_text() {
        assert_eq!(
            matches("chinese phone number", "联系电话13800138000，欢迎来电"),
            vec!["话13800138000，"]
        );
    }

    #[test]
    fn default_password_rule_stops_at_chinese_prefix() {
        let found = matches("Password Field", r#"{"中文password":"hunter2"}"#);
        assert_eq!(found.len(), 1);
        assert!(found[0].starts_with("password"));
        assert!(found[0].contains("hunter2"));
    }

    #[test]
    fn default_password_rule() {
        let found = matches("Password Field", r#"{"password":"hunter2"}"#);
        assert_eq!(found.len(), 1);
        assert!(found[0].contains("hunter2"));
    }

    #[test]
    fn default_sensitive_data_rule() {
        let found = matches("sensitive data", r#"{"token": "abc123"}"#);
        assert!(found.iter().any(|m| m.contains("abc123")));
    }

    #[test]
    fn default_windows_path_rule() {
        let found = matches("windows file/dir Path", r#"error in "C:\inetpub\wwwroot\web.config""#);
        assert_eq!(found.len(), 1);
        assert!(found[0].contains(r"C:\inetpub"));
    }

    #[test]
    fn compile_reports_bad_regex() {
        let err = compile(&spec("broken", "(unclosed")).unwrap_err();
        assert!(matches!(err, RespGuardError::RuleCompile { ref name, .. } if name == "broken"));
    }

    #[test]
    fn compile_accepts_reg_alias() {
        let mut s = spec("legacy", "secret");
        s.filter_type = "reg".to_string();
        let rule = compile(&s).unwrap();
        assert_eq!(rule.kind, RuleKind::Pattern);
        assert_eq!(rule.severity, Severity::Medium);
    }

    #[test]
    fn compile_rejects_unknown_type() {
        let mut s = spec("weird", "x");
        s.filter_type = "entropy".to_string();
        let err = compile(&s).unwrap_err();
        assert!(matches!(err, RespGuardError::UnsupportedRule { .. }));
    }

    #[test]
    fn unknown_level_falls_back_to_low() {
        let mut s = spec("lvl", "x");
        s.filter_level = "critical".to_string();
        assert_eq!(compile(&s).unwrap().severity, Severity::Low);
    }

    #[test]
    fn from_specs_skips_invalid_and_keeps_order() {
        let rules = RuleSet::from_specs(&[
            spec("first", "a+"),
            spec("broken", "[z-a]"),
            spec("second", "b+"),
        ]);
        let names: Vec<&str> = rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}
