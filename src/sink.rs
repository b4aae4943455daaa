//! Outbound reporting of findings.
//!
//! The scan pipeline formats each new finding (see [`Finding::log_line`]) and
//! hands it to a [`FindingSink`]. Sinks are called from scan worker threads and
//! must not block for long.

use std::io::Write;
use std::sync::Mutex;

use crate::dlp::{Finding, Severity};

/// Receiver for findings emitted by the filter engine.
pub trait FindingSink: Send + Sync {
    fn report(&self, finding: &Finding);
}

/// Prints finding lines to stdout, ANSI-coloured by severity.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    color: bool,
}

impl ConsoleSink {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    /// Render a finding the way it is printed.
    pub fn render(&self, finding: &Finding) -> String {
        let line = finding.log_line();
        if !self.color {
            return line;
        }
        format!("\x1b[{}m{}\x1b[0m", ansi_code(finding.severity), line)
    }
}

fn ansi_code(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "32",
        Severity::Medium => "33",
        Severity::High => "31",
    }
}

impl FindingSink for ConsoleSink {
    fn report(&self, finding: &Finding) {
        let mut out = std::io::stdout().lock();
        // A closed stdout must not take down a scan worker.
        let _ = writeln!(out, "{}", self.render(finding));
    }
}

/// Prints one JSON object per finding to stdout.
#[derive(Debug, Default)]
pub struct JsonSink;

impl JsonSink {
    pub fn render(finding: &Finding) -> String {
        serde_json::to_string(finding).unwrap_or_else(|_| finding.log_line())
    }
}

impl FindingSink for JsonSink {
    fn report(&self, finding: &Finding) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}", Self::render(finding));
    }
}

/// Collects findings in memory, for tests and embedders that post-process them.
#[derive(Debug, Default)]
pub struct MemorySink {
    findings: Mutex<Vec<Finding>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn findings(&self) -> Vec<Finding> {
        self.findings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.findings.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FindingSink for MemorySink {
    fn report(&self, finding: &Finding) {
        self.findings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(finding.clone());
    }
}
