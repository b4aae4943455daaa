//! TOML configuration for respguard.
//!
//! The top-level [`AppConfig`] is deserialized from `respguard.toml`. Keys use
//! the camelCase spelling of the filter definitions the scanner grew up with.
//!
//! # Example `respguard.toml`
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:8081"
//! threadCount = 10
//! idleTimeoutSecs = 30
//! maxCaptureBytes = 10485760
//!
//! [scanner]
//! maxFingerprints = 100000
//!
//! [[filters]]
//! filterName = "email field"
//! filterType = "pattern"
//! filterRegex = '[a-z0-9.]+@[a-z0-9.]+\.[a-z]{2,5}'
//! filterResource = "body"
//! filterLevel = "low"
//! filterEnabled = true
//! ```
//!
//! The [`reload`] submodule swaps the active rule set when the file changes.

pub mod reload;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dlp::RuleSet;
use crate::error::Result;
use crate::scheduler::DEFAULT_SKIP_EXTENSIONS;

/// Worker slots used when `threadCount` is missing or zero.
pub const DEFAULT_WORKERS: usize = 10;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8081";

/// Seconds an upstream may stay silent before the relay gives up on it.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;

/// Largest response the relay buffers for scanning.
pub const DEFAULT_MAX_CAPTURE_BYTES: usize = 10 * 1024 * 1024;

/// Turn a configured listen address into one the socket layer accepts.
///
/// A bare `:port` means every interface.
pub fn bind_address(listen: &str) -> String {
    let listen = listen.trim();
    if listen.starts_with(':') {
        format!("0.0.0.0{}", listen)
    } else {
        listen.to_string()
    }
}

/// One rule as written in the `[[filters]]` array.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    /// Name shown in finding lines (e.g., `"email field"`).
    pub filter_name: String,
    /// Rule kind: `"pattern"` (or the older `"reg"`).
    #[serde(default = "default_filter_type")]
    pub filter_type: String,
    /// Regular expression run against the normalized body.
    pub filter_regex: String,
    /// Part of the response to inspect; only `"body"` is supported.
    #[serde(default = "default_filter_resource")]
    pub filter_resource: String,
    /// `"low"`, `"medium"` or `"high"`.
    #[serde(default = "default_filter_level")]
    pub filter_level: String,
    #[serde(default = "default_true")]
    pub filter_enabled: bool,
}

fn default_filter_type() -> String {
    "pattern".to_string()
}

fn default_filter_resource() -> String {
    "body".to_string()
}

fn default_filter_level() -> String {
    "low".to_string()
}

fn default_true() -> bool {
    true
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

/// Relay settings (`[server]` section).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Address the relay listens on.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Concurrent scan workers; `0` means [`DEFAULT_WORKERS`].
    #[serde(default)]
    pub thread_count: usize,
    /// Idle time allowed between upstream reads. The response as a whole
    /// may take longer.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    /// Responses larger than this are still relayed in full but not scanned.
    #[serde(default)]
    pub max_capture_bytes: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            thread_count: 0,
            idle_timeout_secs: None,
            max_capture_bytes: None,
        }
    }
}

/// Scan pipeline settings (`[scanner]` section).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerConfig {
    /// Path suffixes that are never scanned. `None` uses the built-in list.
    #[serde(default)]
    pub skip_extensions: Option<Vec<String>>,
    /// Bound on remembered body fingerprints. `None` or `0` is unbounded.
    #[serde(default)]
    pub max_fingerprints: Option<usize>,
    /// Bound on remembered findings. `None` or `0` is unbounded.
    #[serde(default)]
    pub max_findings: Option<usize>,
}

/// Top-level configuration deserialized from `respguard.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    /// Ordered rule definitions. Empty means the built-in rules.
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

impl AppConfig {
    /// Load and parse the configuration from a TOML file at the given path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the configuration, falling back to defaults if it cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load_from_path(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Config {} unusable ({}); using default filters", path.display(), e);
                Self::default()
            }
        }
    }

    /// Effective number of worker slots.
    pub fn workers(&self) -> usize {
        match self.server.thread_count {
            0 => DEFAULT_WORKERS,
            n => n,
        }
    }

    /// Effective upstream idle timeout. Zero falls back to the default.
    pub fn idle_timeout(&self) -> Duration {
        match self.server.idle_timeout_secs {
            None | Some(0) => Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            Some(secs) => Duration::from_secs(secs),
        }
    }

    /// Effective capture limit. Zero falls back to the default.
    pub fn capture_limit(&self) -> usize {
        match self.server.max_capture_bytes {
            None | Some(0) => DEFAULT_MAX_CAPTURE_BYTES,
            Some(n) => n,
        }
    }

    /// Effective skip list.
    pub fn skip_extensions(&self) -> Vec<String> {
        match &self.scanner.skip_extensions {
            Some(exts) => exts.clone(),
            None => DEFAULT_SKIP_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Compile the configured filters, or the built-in rules if none are configured.
    pub fn rule_set(&self) -> RuleSet {
        if self.filters.is_empty() {
            info!("No filters configured, using default filters");
            return RuleSet::defaults();
        }
        let rules = RuleSet::from_specs(&self.filters);
        info!("Loaded {} of {} filters from config", rules.len(), self.filters.len());
        rules
    }
}
