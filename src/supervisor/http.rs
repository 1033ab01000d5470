// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Hand-rolled HTTP/1.1 request/response framing over the supervisor's
//! Unix stream socket, in the same Content-Length-prefixed style used
//! for the LSP child protocol: read until the header terminator, parse
//! a Content-Length if present, then read exactly that many body bytes.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// A parsed HTTP/1.1 request.
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method, e.g. `"GET"`.
    pub method: String,
    /// Request path, without the query string.
    pub path: String,
    /// Parsed query parameters.
    pub query: HashMap<String, String>,
    /// Request body, empty for methods with no body.
    pub body: Vec<u8>,
}

impl Request {
    /// Returns a query parameter by name.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// An HTTP/1.1 response to write back to the client.
pub struct Response {
    status: u16,
    reason: &'static str,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
}

impl Response {
    /// `200 OK` with a JSON body.
    #[must_use]
    pub fn json(value: &impl serde::Serialize) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
        Self {
            status: 200,
            reason: "OK",
            headers: vec![("Content-Type", "application/json".to_string())],
            body,
        }
    }

    /// `404 Not Found`, no body.
    #[must_use]
    pub fn not_found() -> Self {
        Self::status_only(404, "Not Found")
    }

    /// `400 Bad Request` with a plain-text reason.
    #[must_use]
    pub fn bad_request(message: &str) -> Self {
        Self::text(400, "Bad Request", message)
    }

    /// `429 Too Many Requests` with a `Retry-After` header in seconds.
    #[must_use]
    pub fn too_many_requests(retry_after_secs: u64) -> Self {
        let mut response = Self::status_only(429, "Too Many Requests");
        response.headers.push(("Retry-After", retry_after_secs.to_string()));
        response
    }

    fn status_only(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn text(status: u16, reason: &'static str, message: &str) -> Self {
        Self {
            status,
            reason,
            headers: vec![("Content-Type", "text/plain".to_string())],
            body: message.as_bytes().to_vec(),
        }
    }

    async fn write_to(&self, stream: &mut UnixStream) -> Result<()> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));

        stream.write_all(head.as_bytes()).await.context("writing response headers")?;
        stream.write_all(&self.body).await.context("writing response body")?;
        stream.flush().await.context("flushing response")
    }
}

/// Reads one HTTP/1.1 request from `stream` and writes `handler`'s
/// response back, then returns.
///
/// # Errors
///
/// Returns an error if the request cannot be parsed or the connection
/// fails before the response is fully written.
pub async fn serve_one<F, Fut>(stream: &mut UnixStream, handler: F) -> Result<()>
where
    F: FnOnce(Request) -> Fut,
    Fut: Future<Output = Response>,
{
    let request = read_request(stream).await?;
    let response = handler(request).await;
    response.write_to(stream).await
}

/// Sends a bodyless HTTP/1.1 request to the supervisor listening at
/// `socket_path` and returns the parsed JSON response body, bounded by
/// `timeout` end to end (connect, write, read).
///
/// # Errors
///
/// Returns an error if the socket cannot be reached, the round trip
/// exceeds `timeout`, or the response body is not valid JSON.
pub async fn request_json(
    socket_path: &Path,
    method: &str,
    target: &str,
    timeout: Duration,
) -> Result<serde_json::Value> {
    let mut stream = tokio::time::timeout(timeout, UnixStream::connect(socket_path))
        .await
        .context("connecting to supervisor timed out")?
        .context("connecting to supervisor")?;

    let head = format!("{method} {target} HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n");
    tokio::time::timeout(timeout, stream.write_all(head.as_bytes()))
        .await
        .context("writing request timed out")?
        .context("writing request")?;

    let body = tokio::time::timeout(timeout, read_response_body(&mut stream))
        .await
        .context("reading response timed out")??;
    serde_json::from_slice(&body).context("parsing response JSON")
}

async fn read_response_body(stream: &mut UnixStream) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    let header_end = loop {
        if let Some(pos) = find_header_end(&buffer) {
            break pos;
        }
        let n = stream.read(&mut chunk).await.context("reading response headers")?;
        if n == 0 {
            anyhow::bail!("connection closed before headers were complete");
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let header_text = std::str::from_utf8(&buffer[..header_end]).context("response headers are not valid UTF-8")?;
    let mut content_length = 0_usize;
    for line in header_text.split("\r\n").skip(1) {
        if let Some(value) = line.strip_prefix("Content-Length:").or_else(|| line.strip_prefix("content-length:")) {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }

    let body_start = header_end + 4;
    while buffer.len() < body_start + content_length {
        let n = stream.read(&mut chunk).await.context("reading response body")?;
        if n == 0 {
            anyhow::bail!("connection closed before body was complete");
        }
        buffer.extend_from_slice(&chunk[..n]);
    }

    Ok(buffer[body_start..body_start + content_length].to_vec())
}

async fn read_request(stream: &mut UnixStream) -> Result<Request> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    let header_end = loop {
        if let Some(pos) = find_header_end(&buffer) {
            break pos;
        }
        let n = stream.read(&mut chunk).await.context("reading request headers")?;
        if n == 0 {
            anyhow::bail!("connection closed before headers were complete");
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let header_text = std::str::from_utf8(&buffer[..header_end]).context("request headers are not valid UTF-8")?;
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default();
    let (path, query) = split_target(target);

    let mut content_length = 0_usize;
    for line in lines {
        if let Some(value) = line.strip_prefix("Content-Length:").or_else(|| line.strip_prefix("content-length:")) {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }

    let body_start = header_end + 4;
    while buffer.len() < body_start + content_length {
        let n = stream.read(&mut chunk).await.context("reading request body")?;
        if n == 0 {
            anyhow::bail!("connection closed before body was complete");
        }
        buffer.extend_from_slice(&chunk[..n]);
    }

    let body = buffer[body_start..body_start + content_length].to_vec();
    Ok(Request { method, path, query, body })
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

fn split_target(target: &str) -> (String, HashMap<String, String>) {
    match target.split_once('?') {
        Some((path, query_string)) => (path.to_string(), parse_query(query_string)),
        None => (target.to_string(), HashMap::new()),
    }
}

fn parse_query(query_string: &str) -> HashMap<String, String> {
    query_string
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((urlencoding_decode(key), urlencoding_decode(value)))
        })
        .collect()
}

/// Percent-decodes `input`, accumulating raw bytes before the final UTF-8
/// conversion so a multi-byte sequence split across consecutive `%XX`
/// triplets (e.g. `%C3%A9`) decodes correctly instead of being rebuilt
/// one mis-cast `char` at a time.
fn urlencoding_decode(input: &str) -> String {
    let mut result = Vec::with_capacity(input.len());
    let mut bytes = input.bytes();
    while let Some(b) = bytes.next() {
        match b {
            b'+' => result.push(b' '),
            b'%' => {
                let hi = bytes.next();
                let lo = bytes.next();
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    let hex = [hi, lo];
                    if let Ok(hex_str) = std::str::from_utf8(&hex) {
                        if let Ok(byte) = u8::from_str_radix(hex_str, 16) {
                            result.push(byte);
                            continue;
                        }
                    }
                }
            }
            other => result.push(other),
        }
    }
    String::from_utf8_lossy(&result).into_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[test]
    fn splits_path_and_query() {
        let (path, query) = split_target("/diagnostics?file=src%2Fmain.rs");
        assert_eq!(path, "/diagnostics");
        assert_eq!(query.get("file"), Some(&"src/main.rs".to_string()));
    }

    #[test]
    fn decodes_multibyte_utf8_sequences() {
        let (_, query) = split_target("/diagnostics?file=caf%C3%A9.rs");
        assert_eq!(query.get("file"), Some(&"café.rs".to_string()));
    }

    #[test]
    fn path_without_query_has_empty_map() {
        let (path, query) = split_target("/health");
        assert_eq!(path, "/health");
        assert!(query.is_empty());
    }

    #[test]
    fn finds_header_terminator() {
        let buffer = b"GET / HTTP/1.1\r\nHost: x\r\n\r\nbody";
        assert_eq!(find_header_end(buffer), Some(23));
    }
}
