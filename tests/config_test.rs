use respguard::config::{AppConfig, DEFAULT_WORKERS};
use respguard::dlp::patterns::default_specs;
use respguard::dlp::Severity;
use respguard::scheduler::DEFAULT_SKIP_EXTENSIONS;

const TEMPLATE: &str = include_str!("../templates/respguard.toml");

const CUSTOM_TOML: &str = r#"
[server]
listen = ":9090"
threadCount = 4

[scanner]
skipExtensions = [".css", ".js"]
maxFingerprints = 1000
maxFindings = 500

[[filters]]
filterName = "internal host"
filterType = "reg"
filterRegex = '[a-z]+\.corp\.internal'
filterResource = "body"
filterLevel = "medium"
filterEnabled = true

[[filters]]
filterName = "jwt"
filterRegex = 'eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+'
filterLevel = "HIGH"

[[filters]]
filterName = "retired"
filterRegex = 'legacy-\d+'
filterEnabled = false

[[filters]]
filterName = "token lookup"
filterType = "jsonpath"
filterRegex = '$.token'
"#;

#[test]
fn template_parses_to_the_built_in_rules() {
    let config: AppConfig = toml::from_str(TEMPLATE).unwrap();
    assert_eq!(config.workers(), DEFAULT_WORKERS);
    assert_eq!(config.skip_extensions().len(), DEFAULT_SKIP_EXTENSIONS.len());

    let defaults = default_specs();
    assert_eq!(config.filters.len(), defaults.len());
    for (configured, built_in) in config.filters.iter().zip(&defaults) {
        assert_eq!(configured.filter_name, built_in.filter_name);
        assert_eq!(configured.filter_regex, built_in.filter_regex);
    }
    assert_eq!(config.rule_set().len(), 7);
}

#[test]
fn custom_config_loads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("respguard.toml");
    std::fs::write(&path, CUSTOM_TOML).unwrap();

    let config = AppConfig::load_from_path(&path).unwrap();
    assert_eq!(config.server.listen, ":9090");
    assert_eq!(config.workers(), 4);
    assert_eq!(config.skip_extensions(), vec![".css", ".js"]);
    assert_eq!(config.scanner.max_fingerprints, Some(1000));
    assert_eq!(config.scanner.max_findings, Some(500));
}

#[test]
fn custom_rules_compile_in_order() {
    let config: AppConfig = toml::from_str(CUSTOM_TOML).unwrap();
    let rules = config.rule_set();

    // The jsonpath filter is not a pattern rule and is skipped.
    let names: Vec<&str> = rules.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["internal host", "jwt", "retired"]);

    assert_eq!(rules.get("internal host").unwrap().severity, Severity::Medium);
    assert_eq!(rules.get("jwt").unwrap().severity, Severity::High);
    assert_eq!(rules.get("retired").unwrap().severity, Severity::Low);
    assert_eq!(rules.enabled().count(), 2);
}

#[test]
fn unreadable_config_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("respguard.toml");
    std::fs::write(&path, "[[filters]\nbroken").unwrap();

    let config = AppConfig::load_or_default(&path);
    assert!(config.filters.is_empty());
    assert_eq!(config.rule_set().len(), default_specs().len());
}

#[test]
fn filters_only_config_keeps_server_defaults() {
    let config: AppConfig = toml::from_str(
        r#"
[[filters]]
filterName = "only"
filterRegex = "x+"
"#,
    )
    .unwrap();
    assert_eq!(config.server.listen, "127.0.0.1:8081");
    assert_eq!(config.workers(), DEFAULT_WORKERS);
    assert_eq!(config.scanner.max_fingerprints, None);
    assert_eq!(config.rule_set().len(), 1);
}
