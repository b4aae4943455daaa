//! Relay-facing entry point.
//!
//! The relay hands each completed response to [`ResponsePipeline::filter_response`]
//! and gets the same response back straight away. Scanning happens later on the
//! scheduler's workers; nothing about the response is changed.

use std::io;
use std::sync::Arc;

use tracing::warn;

use crate::config::reload::ActiveRules;
use crate::config::AppConfig;
use crate::error::{RespGuardError, Result};
use crate::scheduler::{ScanScheduler, SchedulerOptions, StatsSnapshot, SubmitOutcome};
use crate::sink::FindingSink;

/// A completed response that the pipeline can inspect.
pub trait InspectableResponse {
    /// Request URL the response belongs to. Used as the finding locator.
    fn locator(&self) -> &str;

    /// Full response body. Errors when the body could not be read from upstream.
    fn body(&mut self) -> io::Result<&[u8]>;
}

/// A response whose body has already been buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResponse {
    pub locator: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedResponse {
    pub fn new(locator: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            locator: locator.into(),
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// First header value with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl InspectableResponse for CapturedResponse {
    fn locator(&self) -> &str {
        &self.locator
    }

    fn body(&mut self) -> io::Result<&[u8]> {
        Ok(&self.body)
    }
}

pub struct ResponsePipeline {
    rules: Arc<ActiveRules>,
    scheduler: ScanScheduler,
}

impl ResponsePipeline {
    pub fn new(rules: Arc<ActiveRules>, scheduler: ScanScheduler) -> Self {
        Self { rules, scheduler }
    }

    /// Build the whole pipeline from configuration on the current runtime.
    pub fn from_config(config: &AppConfig, sink: Arc<dyn FindingSink>) -> Result<Self> {
        let rules = Arc::new(ActiveRules::new(config.rule_set()));
        let scheduler = ScanScheduler::new(SchedulerOptions::from_config(config), sink)?;
        Ok(Self::new(rules, scheduler))
    }

    /// Offer the response for scanning and hand it back unchanged.
    pub fn filter_response<R: InspectableResponse>(&self, mut response: R) -> R {
        self.inspect(&mut response);
        response
    }

    /// Offer the response for scanning.
    ///
    /// Returns `None` when the body could not be read; the response is left
    /// as it was and nothing is scanned.
    pub fn inspect<R: InspectableResponse>(&self, response: &mut R) -> Option<SubmitOutcome> {
        let locator = response.locator().to_string();
        match response.body() {
            Ok(body) => Some(self.submit(body, &locator)),
            Err(e) => {
                let err = RespGuardError::BodyRead(e);
                warn!(locator = %locator, "Response not scanned: {}", err);
                None
            }
        }
    }

    /// Submit a raw body under the current rule snapshot.
    pub fn submit(&self, body: &[u8], locator: &str) -> SubmitOutcome {
        self.scheduler.submit(body, locator, self.rules.snapshot())
    }

    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.scheduler.stats()
    }

    pub fn rules(&self) -> &Arc<ActiveRules> {
        &self.rules
    }

    pub fn scheduler(&self) -> &ScanScheduler {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    struct Unreadable;

    impl InspectableResponse for Unreadable {
        fn locator(&self) -> &str {
            "http://x/broken"
        }

        fn body(&mut self) -> io::Result<&[u8]> {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "upstream closed"))
        }
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut resp = CapturedResponse::new("http://x/y", "hi");
        resp.headers
            .push(("Content-Type".to_string(), "text/plain".to_string()));
        assert_eq!(resp.header("content-type"), Some("text/plain"));
        assert_eq!(resp.header("x-missing"), None);
    }

    #[tokio::test]
    async fn unreadable_body_passes_through() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = ResponsePipeline::from_config(&AppConfig::default(), sink.clone()).unwrap();

        let mut resp = Unreadable;
        assert_eq!(pipeline.inspect(&mut resp), None);
        let _resp = pipeline.filter_response(resp);
        assert_eq!(pipeline.stats().submitted, 0);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn response_comes_back_unchanged() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = ResponsePipeline::from_config(&AppConfig::default(), sink).unwrap();

        let original = CapturedResponse::new("http://x/y", "contact: a@b.com");
        let returned = pipeline.filter_response(original.clone());
        assert_eq!(returned, original);
        pipeline.wait_idle().await;
    }
}
