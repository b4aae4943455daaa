use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use super::http::{self, RelayedResponse};
use crate::config::{DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_CAPTURE_BYTES};
use crate::pipeline::ResponsePipeline;

const MAX_REQUEST_HEAD: usize = 64 * 1024;

/// Per-connection bounds on how long and how much of a response is relayed
/// and captured.
#[derive(Debug, Clone, Copy)]
pub struct RelayLimits {
    /// Longest silence allowed between two upstream reads.
    pub idle_timeout: Duration,
    /// Largest response kept for scanning.
    pub capture_limit: usize,
}

impl Default for RelayLimits {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            capture_limit: DEFAULT_MAX_CAPTURE_BYTES,
        }
    }
}

/// Hop-by-hop headers replaced on the forwarded request. `Accept-Encoding`
/// is dropped so upstream bodies arrive uncompressed and can be scanned.
const STRIPPED_REQUEST_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "accept-encoding",
];

/// Main accept loop: accept incoming connections and handle them.
pub async fn accept_loop(
    listener: TcpListener,
    pipeline: Arc<ResponsePipeline>,
    limits: RelayLimits,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                debug!("New connection from {}", peer_addr);
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &pipeline, limits).await {
                        error!("Error handling connection from {}: {}", peer_addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Read from the client until the request head is complete.
///
/// Returns `None` if the client closed the connection first. The returned
/// buffer may hold the start of the request body after the head.
async fn read_request_head(client: &mut TcpStream) -> anyhow::Result<Option<Vec<u8>>> {
    let mut buf = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];
    loop {
        let n = client.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
        if http::find_head_end(&buf).is_some() {
            return Ok(Some(buf));
        }
        if buf.len() > MAX_REQUEST_HEAD {
            anyhow::bail!("request head exceeds {} bytes", MAX_REQUEST_HEAD);
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(
    mut client: TcpStream,
    pipeline: &ResponsePipeline,
    limits: RelayLimits,
) -> anyhow::Result<()> {
    let raw = match read_request_head(&mut client).await? {
        Some(raw) => raw,
        None => return Ok(()),
    };

    let request = String::from_utf8_lossy(&raw);
    let first_line = request.lines().next().unwrap_or("");

    if first_line.starts_with("CONNECT ") {
        handle_connect(&mut client, first_line).await
    } else {
        handle_http_request(&mut client, &raw, pipeline, limits).await
    }
}

/// Tunnel a CONNECT request without inspecting it.
async fn handle_connect(client: &mut TcpStream, first_line: &str) -> anyhow::Result<()> {
    let parts: Vec<&str> = first_line.split_whitespace().collect();
    if parts.len() < 2 {
        client.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await?;
        return Ok(());
    }

    let target = parts[1];
    info!("CONNECT tunnel to {}", target);

    match TcpStream::connect(target).await {
        Ok(mut remote) => {
            client
                .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                .await?;
            if let Err(e) = tokio::io::copy_bidirectional(client, &mut remote).await {
                debug!("Tunnel to {} closed: {}", target, e);
            }
        }
        Err(e) => {
            warn!("Failed to connect to {}: {}", target, e);
            client.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await?;
        }
    }

    Ok(())
}

/// Rewrite the client's request head for the upstream server.
fn forward_head(method: &str, uri: &str, version: &str, header_lines: &[&str]) -> String {
    let mut out = format!("{} {} {}\r\n", method, http::parse_path(uri), version);
    for line in header_lines {
        let name = line.split(':').next().unwrap_or("").trim();
        if STRIPPED_REQUEST_HEADERS
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name))
        {
            continue;
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    out.push_str("Connection: close\r\n\r\n");
    out
}

/// How the upstream side of a relayed response ended.
#[derive(Debug)]
enum Capture {
    /// Upstream closed the connection after sending everything.
    Complete(Vec<u8>),
    /// The exchange stopped before upstream closed the connection.
    Cut(Vec<u8>),
    /// The response outgrew the capture limit. Holds the bytes relayed.
    Oversized(u64),
}

/// Copy the upstream response to the client, keeping a copy for scanning.
///
/// The idle timeout applies to each read, so a slow but steady upstream is
/// never cut off. Once the copy would exceed `limits.capture_limit` it is
/// discarded and the rest of the response is only relayed.
async fn relay_response<R, W>(
    upstream: &mut R,
    client: &mut W,
    target: &str,
    limits: RelayLimits,
) -> Capture
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut captured = Vec::new();
    let mut relayed: u64 = 0;
    let mut oversized = false;
    let mut buf = [0u8; 8192];

    loop {
        let n = match tokio::time::timeout(limits.idle_timeout, upstream.read(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!("Error streaming response from {}: {}", target, e);
                return Capture::Cut(captured);
            }
            Err(_) => {
                warn!("{} idle for {:?}, closing", target, limits.idle_timeout);
                return Capture::Cut(captured);
            }
        };
        if let Err(e) = client.write_all(&buf[..n]).await {
            debug!("Client left while streaming from {}: {}", target, e);
            return Capture::Cut(captured);
        }
        relayed += n as u64;

        if oversized {
            continue;
        }
        if captured.len() + n > limits.capture_limit {
            oversized = true;
            captured = Vec::new();
        } else {
            captured.extend_from_slice(&buf[..n]);
        }
    }

    if oversized {
        Capture::Oversized(relayed)
    } else {
        Capture::Complete(captured)
    }
}

/// Forward a plain HTTP request, stream the response back and hand a copy to
/// the pipeline once it is complete.
async fn handle_http_request(
    client: &mut TcpStream,
    raw_request: &[u8],
    pipeline: &ResponsePipeline,
    limits: RelayLimits,
) -> anyhow::Result<()> {
    let head_end = http::find_head_end(raw_request).unwrap_or(raw_request.len());
    let head = String::from_utf8_lossy(&raw_request[..head_end]);
    let mut lines = head.split("\r\n");
    let first_line = lines.next().unwrap_or("");

    let parts: Vec<&str> = first_line.split_whitespace().collect();
    if parts.len() < 2 || !parts[1].starts_with("http://") {
        warn!("Rejected request line {:?}", first_line);
        client.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await?;
        return Ok(());
    }

    let method = parts[0];
    let uri = parts[1];
    let version = parts.get(2).copied().unwrap_or("HTTP/1.1");
    let header_lines: Vec<&str> = lines.collect();
    let (host, port) = http::parse_host_port(uri);
    let target = format!("{}:{}", host, port);

    // Request body bytes already read along with the head.
    let body_start = (head_end + 4).min(raw_request.len());
    let early_body = &raw_request[body_start..];
    let request_headers = http::parse_headers(header_lines.iter().copied());
    let chunked_upload = http::header(&request_headers, "transfer-encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    let content_length = http::header(&request_headers, "content-length")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    info!("HTTP {} to {}", method, uri);

    let mut remote = match TcpStream::connect(&target).await {
        Ok(remote) => remote,
        Err(e) => {
            warn!("Failed to connect to {}: {}", target, e);
            client.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await?;
            return Ok(());
        }
    };

    remote
        .write_all(forward_head(method, uri, version, &header_lines).as_bytes())
        .await?;
    remote.write_all(early_body).await?;
    if !chunked_upload {
        let remaining = content_length.saturating_sub(early_body.len() as u64);
        if remaining > 0 {
            tokio::io::copy(&mut (&mut *client).take(remaining), &mut remote).await?;
        }
    }

    let (mut client_rd, mut client_wr) = client.split();
    let (mut remote_rd, mut remote_wr) = remote.split();

    // A chunked request body has no length up front, so it is copied while
    // the response streams back. The response side decides when to stop.
    let upload = async {
        if chunked_upload {
            if let Err(e) = tokio::io::copy(&mut client_rd, &mut remote_wr).await {
                debug!("Request body to {} ended: {}", target, e);
            }
        }
        std::future::pending::<Capture>().await
    };
    let capture = tokio::select! {
        capture = relay_response(&mut remote_rd, &mut client_wr, &target, limits) => capture,
        capture = upload => capture,
    };

    let head_request = method.eq_ignore_ascii_case("HEAD");
    match capture {
        Capture::Complete(raw) => {
            debug!("Streamed {} bytes from {}", raw.len(), target);
            let response = RelayedResponse::new(uri, raw, true).head_request(head_request);
            pipeline.filter_response(response);
        }
        Capture::Cut(raw) => {
            pipeline.filter_response(RelayedResponse::new(uri, raw, false));
        }
        Capture::Oversized(relayed) => {
            info!(
                "Response from {} is {} bytes, over the {} byte capture limit; not scanned",
                uri, relayed, limits.capture_limit
            );
        }
    }
    Ok(())
}
