use thiserror::Error;

/// Unified error type for the respguard library.
#[derive(Debug, Error)]
pub enum RespGuardError {
    #[error("Charset error: {0}")]
    Charset(String),

    #[error("Invalid pattern for filter {name}: {source}")]
    RuleCompile {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("Unsupported filter {name}: {reason}")]
    UnsupportedRule { name: String, reason: String },

    #[error("Body read error: {0}")]
    BodyRead(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("No async runtime available: {0}")]
    Runtime(String),

    #[error("Relay error: {0}")]
    Relay(String),
}

pub type Result<T> = std::result::Result<T, RespGuardError>;
