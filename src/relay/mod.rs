//! Forward relay that feeds completed responses to the scan pipeline.
//!
//! Plain HTTP requests are forwarded and their responses captured. `CONNECT`
//! requests are tunnelled as opaque bytes; TLS traffic is never inspected.

pub mod connect;
pub mod http;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

pub use connect::RelayLimits;

use crate::pipeline::ResponsePipeline;

pub struct RelayServer {
    listen_addr: String,
    pipeline: Arc<ResponsePipeline>,
    limits: RelayLimits,
}

impl RelayServer {
    pub fn new(listen_addr: String, pipeline: Arc<ResponsePipeline>) -> Self {
        Self {
            listen_addr,
            pipeline,
            limits: RelayLimits::default(),
        }
    }

    /// Longest silence allowed between two reads from an upstream server.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.limits.idle_timeout = idle_timeout;
        self
    }

    /// Responses larger than `capture_limit` bytes are relayed but not scanned.
    pub fn with_capture_limit(mut self, capture_limit: usize) -> Self {
        self.limits.capture_limit = capture_limit;
        self
    }

    /// Start the relay and return the actual bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("respguard relay listening on {}", local_addr);

        let pipeline = self.pipeline.clone();
        let limits = self.limits;
        tokio::spawn(async move {
            connect::accept_loop(listener, pipeline, limits).await;
        });

        Ok(local_addr)
    }
}
