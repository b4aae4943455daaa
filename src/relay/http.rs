//! Minimal HTTP/1.x message handling for the relay.
//!
//! Only what the relay needs: splitting a buffered response into head and
//! body, undoing chunked transfer encoding, and a few URI helpers.

use std::io;

use crate::pipeline::{CapturedResponse, InspectableResponse};

const HEAD_END: &[u8] = b"\r\n\r\n";

/// Offset of the blank line ending the head, if the buffer contains one.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_END.len()).position(|w| w == HEAD_END)
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn truncated(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, msg.to_string())
}

/// Parse `Name: value` header lines, skipping anything without a colon.
pub fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<(String, String)> {
    lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// First value of the named header, compared case-insensitively.
pub fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Decode a chunked transfer-encoded body. Trailers are ignored.
pub fn decode_chunked(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut pos = 0;
    loop {
        let line_len = data[pos..]
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| truncated("chunk size line not terminated"))?;
        let line = String::from_utf8_lossy(&data[pos..pos + line_len]);
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| invalid(&format!("bad chunk size {:?}", size_str)))?;
        pos += line_len + 2;
        if size == 0 {
            return Ok(out);
        }
        let end = pos
            .checked_add(size)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| truncated("chunk shorter than declared"))?;
        out.extend_from_slice(&data[pos..end]);
        pos = end;
        if data.len() < pos + 2 {
            return Err(truncated("chunk not terminated"));
        }
        if &data[pos..pos + 2] != b"\r\n" {
            return Err(invalid("chunk data not followed by CRLF"));
        }
        pos += 2;
    }
}

/// Whether a response with this status may carry a body at all.
fn status_has_body(status: u16) -> bool {
    !(100..200).contains(&status) && status != 204 && status != 304
}

/// Split a complete buffered response into status, headers and decoded body.
///
/// A reply to `HEAD`, and any `1xx`, `204` or `304` reply, has an empty body
/// whatever its `Content-Length` or `Transfer-Encoding` headers announce.
pub fn parse_response(
    raw: &[u8],
    locator: &str,
    head_request: bool,
) -> io::Result<CapturedResponse> {
    let head_end = find_head_end(raw).ok_or_else(|| truncated("response head incomplete"))?;
    let head = String::from_utf8_lossy(&raw[..head_end]);
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or("");
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| invalid(&format!("bad status line {:?}", status_line)))?;

    let mut response = CapturedResponse {
        locator: locator.to_string(),
        status,
        headers: parse_headers(lines),
        body: Vec::new(),
    };
    if head_request || !status_has_body(status) {
        return Ok(response);
    }

    let rest = &raw[head_end + HEAD_END.len()..];
    let chunked = response
        .header("transfer-encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    response.body = if chunked {
        decode_chunked(rest)?
    } else {
        match response.header("content-length").and_then(|v| v.parse::<usize>().ok()) {
            Some(len) if len > rest.len() => return Err(truncated("body shorter than Content-Length")),
            Some(len) => rest[..len].to_vec(),
            None => rest.to_vec(),
        }
    };
    Ok(response)
}

/// A response as captured off the wire by the relay.
///
/// The body is decoded on first access. A capture cut short by an upstream
/// error or timeout reports a read error instead of a partial body.
pub struct RelayedResponse {
    locator: String,
    raw: Vec<u8>,
    complete: bool,
    head_request: bool,
    decoded: Option<CapturedResponse>,
}

impl RelayedResponse {
    pub fn new(locator: impl Into<String>, raw: Vec<u8>, complete: bool) -> Self {
        Self {
            locator: locator.into(),
            raw,
            complete,
            head_request: false,
            decoded: None,
        }
    }

    /// Mark the response as the reply to a `HEAD` request, which has no body.
    pub fn head_request(mut self, head_request: bool) -> Self {
        self.head_request = head_request;
        self
    }
}

impl InspectableResponse for RelayedResponse {
    fn locator(&self) -> &str {
        &self.locator
    }

    fn body(&mut self) -> io::Result<&[u8]> {
        if !self.complete {
            return Err(truncated("upstream response incomplete"));
        }
        if self.decoded.is_none() {
            self.decoded = Some(parse_response(&self.raw, &self.locator, self.head_request)?);
        }
        Ok(self
            .decoded
            .as_ref()
            .map(|d| d.body.as_slice())
            .unwrap_or_default())
    }
}

fn strip_scheme(uri: &str) -> &str {
    uri.strip_prefix("http://")
        .or_else(|| uri.strip_prefix("https://"))
        .unwrap_or(uri)
}

/// Parse host and port from an absolute URI like "http://example.com:8080/path"
pub fn parse_host_port(uri: &str) -> (String, u16) {
    let default_port: u16 = if uri.starts_with("https://") { 443 } else { 80 };
    let rest = strip_scheme(uri);
    let host_port = rest.split(['/', '?', '#']).next().unwrap_or(rest);

    match host_port.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(default_port)),
        None => (host_port.to_string(), default_port),
    }
}

/// Origin-form request target (path and query) of an absolute URI.
pub fn parse_path(uri: &str) -> String {
    let rest = strip_scheme(uri);
    match rest.find(['/', '?']) {
        Some(pos) if rest[pos..].starts_with('?') => format!("/{}", &rest[pos..]),
        Some(pos) => rest[pos..].to_string(),
        None => "/".to_string(),
    }
}
