//! Bounded, non-blocking scan scheduler.
//!
//! [`ScanScheduler::submit`] never waits. A body is:
//!
//! 1. rejected as a duplicate if its fingerprint has been seen before,
//! 2. dropped if every worker slot is busy,
//! 3. otherwise admitted and scanned on Tokio's blocking pool.
//!
//! An admitted task whose locator path ends in a skipped extension finishes
//! without decoding the body. Every other task normalizes the charset (falling
//! back to the raw bytes) and runs the filter engine. The task owns its
//! semaphore permit, so the slot is returned on every exit path, panics included.
//!
//! Dropping under load is intentional: the relay's latency matters more than
//! complete coverage. Nothing is retried or queued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::charset::{self, CharsetNormalizer, TextNormalizer};
use crate::config::AppConfig;
use crate::dedup::{ContentCache, FindingIndex, Fingerprint};
use crate::dlp::engine::FilterEngine;
use crate::dlp::RuleSet;
use crate::error::{RespGuardError, Result};
use crate::sink::FindingSink;

/// Path suffixes of resources that are not worth scanning.
pub const DEFAULT_SKIP_EXTENSIONS: &[&str] = &[
    ".ico", ".png", ".jpg", ".gif", ".jpeg", ".webp", ".svg", ".woff", ".woff2", ".ttf", ".eot",
    ".mp4", ".mp3", ".avi", ".mov", ".wmv", ".flv", ".pdf", ".zip", ".rar", ".7z", ".tar", ".gz",
    ".bz2",
];

/// What happened to a submitted body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Identical content was submitted before; nothing to do.
    Duplicate,
    /// All worker slots were busy; the body will not be scanned.
    Dropped,
    /// A worker slot was taken and the scan is running in the background.
    Admitted,
}

#[derive(Debug, Default)]
struct ScanStats {
    submitted: AtomicU64,
    duplicates: AtomicU64,
    dropped: AtomicU64,
    admitted: AtomicU64,
    skipped: AtomicU64,
    scanned: AtomicU64,
    findings: AtomicU64,
}

impl ScanStats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            scanned: self.scanned.load(Ordering::Relaxed),
            findings: self.findings.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub duplicates: u64,
    pub dropped: u64,
    pub admitted: u64,
    /// Admitted tasks that ended at the extension check.
    pub skipped: u64,
    /// Admitted tasks that ran the filter engine to completion.
    pub scanned: u64,
    pub findings: u64,
}

/// Construction parameters for a [`ScanScheduler`].
///
/// The dedup structures are passed in so several schedulers can share them,
/// or so a test can inspect them afterwards.
pub struct SchedulerOptions {
    pub workers: usize,
    pub skip_extensions: Vec<String>,
    pub content: Arc<ContentCache>,
    pub findings: Arc<FindingIndex>,
    pub normalizer: Arc<dyn TextNormalizer>,
}

impl SchedulerOptions {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            skip_extensions: DEFAULT_SKIP_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            content: Arc::new(ContentCache::default()),
            findings: Arc::new(FindingIndex::default()),
            normalizer: Arc::new(CharsetNormalizer),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            workers: config.workers(),
            skip_extensions: config.skip_extensions(),
            content: Arc::new(ContentCache::new(config.scanner.max_fingerprints)),
            findings: Arc::new(FindingIndex::new(config.scanner.max_findings)),
            normalizer: Arc::new(CharsetNormalizer),
        }
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn TextNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_skip_extensions(mut self, exts: Vec<String>) -> Self {
        self.skip_extensions = exts;
        self
    }
}

/// Runs on a blocking thread while holding a worker slot.
struct ScanWorker {
    normalizer: Arc<dyn TextNormalizer>,
    engine: FilterEngine,
    skip_extensions: Vec<String>,
    stats: Arc<ScanStats>,
}

impl ScanWorker {
    fn run(&self, body: &[u8], locator: &str, rules: &RuleSet) {
        if has_skipped_extension(locator, &self.skip_extensions) {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            debug!(locator, "Scan skipped by extension");
            return;
        }
        let text = charset::normalize_or_raw(self.normalizer.as_ref(), body, locator);
        let found = self.engine.evaluate(&text, locator, rules);
        self.stats.scanned.fetch_add(1, Ordering::Relaxed);
        self.stats
            .findings
            .fetch_add(found.len() as u64, Ordering::Relaxed);
    }
}

/// Path part of a locator (query string and fragment removed), lowercased.
fn locator_path(locator: &str) -> String {
    locator
        .split(['?', '#'])
        .next()
        .unwrap_or(locator)
        .to_ascii_lowercase()
}

/// Whether the locator's path ends in one of `exts` (already lowercased).
pub fn has_skipped_extension(locator: &str, exts: &[String]) -> bool {
    let path = locator_path(locator);
    exts.iter().any(|ext| path.ends_with(ext.as_str()))
}

pub struct ScanScheduler {
    slots: Arc<Semaphore>,
    capacity: usize,
    content: Arc<ContentCache>,
    worker: Arc<ScanWorker>,
    stats: Arc<ScanStats>,
    runtime: Handle,
}

impl ScanScheduler {
    /// Build a scheduler on the current Tokio runtime.
    pub fn new(options: SchedulerOptions, sink: Arc<dyn FindingSink>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| RespGuardError::Runtime(e.to_string()))?;
        Ok(Self::with_handle(options, sink, runtime))
    }

    pub fn with_handle(options: SchedulerOptions, sink: Arc<dyn FindingSink>, runtime: Handle) -> Self {
        let capacity = options.workers.max(1);
        let stats = Arc::new(ScanStats::default());
        let skip_extensions = options
            .skip_extensions
            .iter()
            .map(|e| e.to_ascii_lowercase())
            .collect();
        let worker = ScanWorker {
            normalizer: options.normalizer,
            engine: FilterEngine::new(options.findings, sink),
            skip_extensions,
            stats: stats.clone(),
        };
        debug!(workers = capacity, "Scan worker pool initialized");
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            content: options.content,
            worker: Arc::new(worker),
            stats,
            runtime,
        }
    }

    /// Offer a body for scanning. Never blocks on scan work.
    ///
    /// The slot permit lives inside the blocking task, so it is returned even
    /// if the scan panics.
    pub fn submit(&self, body: &[u8], locator: &str, rules: Arc<RuleSet>) -> SubmitOutcome {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);

        let fingerprint = Fingerprint::of(body);
        if !self.content.should_scan_fingerprint(fingerprint) {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            debug!(locator, %fingerprint, "Duplicate body, not scanned");
            return SubmitOutcome::Duplicate;
        }

        let permit = match self.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(locator, "All scan workers busy, body dropped");
                return SubmitOutcome::Dropped;
            }
        };
        self.stats.admitted.fetch_add(1, Ordering::Relaxed);

        let body = body.to_vec();
        let locator = locator.to_string();
        let worker = self.worker.clone();
        self.runtime.spawn_blocking(move || {
            let _permit = permit;
            worker.run(&body, &locator, &rules);
        });
        SubmitOutcome::Admitted
    }

    /// Wait until every admitted scan has released its slot.
    ///
    /// Meant for quiescent points (shutdown, batch scans, tests): while it
    /// waits, freed slots go to this call and new submissions are dropped.
    pub async fn wait_idle(&self) {
        let all = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        if let Ok(permits) = self.slots.acquire_many(all).await {
            drop(permits);
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of scans currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn content_cache(&self) -> &ContentCache {
        &self.content
    }

    pub fn finding_index(&self) -> &FindingIndex {
        self.worker.engine.index()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts() -> Vec<String> {
        DEFAULT_SKIP_EXTENSIONS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn skips_known_binary_extensions() {
        assert!(has_skipped_extension("http://x/logo.png", &exts()));
        assert!(has_skipped_extension("http://x/font.woff2", &exts()));
        assert!(has_skipped_extension("http://x/archive.tar.gz", &exts()));
    }

    #[test]
    fn extension_check_ignores_query_and_fragment() {
        assert!(has_skipped_extension("http://x/logo.png?v=3", &exts()));
        assert!(has_skipped_extension("http://x/doc.pdf#page=2", &exts()));
        assert!(!has_skipped_extension("http://x/api?file=a.png", &exts()));
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(has_skipped_extension("http://x/PHOTO.JPG", &exts()));
    }

    #[test]
    fn text_resources_are_not_skipped() {
        assert!(!has_skipped_extension("http://x/app.js", &exts()));
        assert!(!has_skipped_extension("http://x/y", &exts()));
        assert!(!has_skipped_extension("http://x/pngs/", &exts()));
    }

    #[test]
    fn new_outside_runtime_is_an_error() {
        let sink = Arc::new(crate::sink::MemorySink::new());
        let result = ScanScheduler::new(SchedulerOptions::new(1), sink);
        assert!(matches!(result, Err(RespGuardError::Runtime(_))));
    }

    #[tokio::test]
    async fn zero_workers_still_gets_one_slot() {
        let sink = Arc::new(crate::sink::MemorySink::new());
        let scheduler = ScanScheduler::new(SchedulerOptions::new(0), sink).unwrap();
        assert_eq!(scheduler.capacity(), 1);
        assert_eq!(scheduler.in_flight(), 0);
    }
}
