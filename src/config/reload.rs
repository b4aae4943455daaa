//! Rule hot-reload support.
//!
//! The active [`RuleSet`] lives in [`ActiveRules`] as an `Arc` behind an
//! `RwLock`. Each scan takes a snapshot of the `Arc` when it is submitted, so
//! a reload never changes the rules of a scan already in flight and readers
//! only hold the lock long enough to clone a pointer.
//!
//! Reload triggers:
//!
//! - **File change**: [`start_file_watcher`] uses the [`notify`] crate
//!   to detect modifications to `respguard.toml`.
//! - **SIGHUP** (Unix only): [`start_sighup_handler`] listens for the
//!   HUP signal for manual reload via `kill -HUP <pid>`.
//!
//! Invalid configuration is handled fail-safe: the old rules are retained
//! and a warning is logged.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use super::AppConfig;
use crate::dlp::RuleSet;

/// The rule set currently used for new scans.
#[derive(Debug, Default)]
pub struct ActiveRules {
    current: RwLock<Arc<RuleSet>>,
}

impl ActiveRules {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(rules)),
        }
    }

    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn replace(&self, rules: RuleSet) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(rules);
    }
}

/// Reload the rules from disk.
///
/// On success the new rule set is swapped in and its size returned. On failure
/// (I/O error, invalid TOML) the old rules are retained and the error returned.
pub fn reload_rules(active: &ActiveRules, config_path: &Path) -> crate::error::Result<usize> {
    let config = AppConfig::load_from_path(config_path)?;
    let rules = config.rule_set();
    let count = rules.len();
    active.replace(rules);
    info!("Rules reloaded from {} ({} rules)", config_path.display(), count);
    Ok(count)
}

/// Start a file-system watcher that triggers [`reload_rules`] on config changes.
///
/// Returns a [`RecommendedWatcher`] handle that must be kept alive for the
/// duration of the watch. Dropping the handle stops the watcher.
pub fn start_file_watcher(
    config_path: PathBuf,
    active: Arc<ActiveRules>,
) -> notify::Result<RecommendedWatcher> {
    let path = config_path.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                info!("Config file changed, reloading rules...");
                if let Err(e) = reload_rules(&active, &path) {
                    warn!("Rule reload failed (keeping old rules): {}", e);
                }
            }
        }
        Err(e) => {
            warn!("File watcher error: {}", e);
        }
    })?;

    watcher.watch(&config_path, RecursiveMode::NonRecursive)?;
    info!("Watching {} for changes", config_path.display());
    Ok(watcher)
}

/// Start a SIGHUP handler that reloads the rules on signal.
#[cfg(unix)]
pub fn start_sighup_handler(config_path: PathBuf, active: Arc<ActiveRules>) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sig = match signal(SignalKind::hangup()) {
            Ok(sig) => sig,
            Err(e) => {
                warn!("Failed to register SIGHUP handler: {}", e);
                return;
            }
        };
        while sig.recv().await.is_some() {
            info!("SIGHUP received, reloading rules...");
            if let Err(e) = reload_rules(&active, &config_path) {
                warn!("Rule reload on SIGHUP failed (keeping old rules): {}", e);
            }
        }
    });
}

/// No-op SIGHUP handler for non-Unix platforms.
#[cfg(not(unix))]
pub fn start_sighup_handler(_config_path: PathBuf, _active: Arc<ActiveRules>) {}
