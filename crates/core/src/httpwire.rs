//! HTTP/1.1 wire dump and parse.
//!
//! Transcript records carry full HTTP messages in their standard wire form
//! (request line or status line, header lines, blank line, body). Headers are
//! kept as whole `Name: Value` lines so multi-valued headers survive intact.

use url::Url;

use crate::error::{CoreError, Result};

/// A parsed HTTP request in wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParts {
    /// HTTP method (GET, POST, ...).
    pub method: String,
    /// Request target in origin form (path + query).
    pub target: String,
    /// Header lines, order preserved.
    pub headers: Vec<String>,
    /// Request body.
    pub body: Vec<u8>,
}

/// A parsed HTTP response in wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseParts {
    /// HTTP status code.
    pub status: u16,
    /// Reason phrase from the status line.
    pub reason: String,
    /// Header lines, order preserved.
    pub headers: Vec<String>,
    /// Response body.
    pub body: Vec<u8>,
}

/// Dump a request as HTTP/1.1 wire bytes.
///
/// The request line uses origin form. Exactly the given header lines are
/// written: the dump must parse back to the same canonical fields, so nothing
/// is synthesized here (the enclosing archive record carries the absolute
/// target URI and host).
pub fn dump_request(method: &str, url: &Url, headers: &[String], body: &[u8]) -> Vec<u8> {
    let mut target = url.path().to_string();
    if let Some(q) = url.query() {
        target.push('?');
        target.push_str(q);
    }

    let mut out = Vec::with_capacity(128 + body.len());
    out.extend_from_slice(format!("{} {} HTTP/1.1\r\n", method, target).as_bytes());
    for line in headers {
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

/// Parse HTTP/1.1 request wire bytes.
pub fn parse_request(data: &[u8]) -> Result<RequestParts> {
    let (head, body) = split_head(data)?;
    let mut lines = head.split("\r\n");

    let request_line = lines
        .next()
        .ok_or_else(|| CoreError::bad_encoding("missing request line"))?;
    let mut parts = request_line.splitn(3, ' ');
    let method = parts
        .next()
        .ok_or_else(|| CoreError::bad_encoding("missing method"))?
        .to_string();
    let target = parts
        .next()
        .ok_or_else(|| CoreError::bad_encoding("missing request target"))?
        .to_string();

    let headers: Vec<String> = lines
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect();

    let body = body_slice(&headers, body);

    Ok(RequestParts {
        method,
        target,
        headers,
        body,
    })
}

/// Dump a response as HTTP/1.1 wire bytes.
pub fn dump_response(status: u16, reason: &str, headers: &[String], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(128 + body.len());
    out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", status, reason).as_bytes());
    for line in headers {
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if header_value(headers, "content-length").is_none() {
        out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

/// Parse HTTP/1.1 response wire bytes.
pub fn parse_response(data: &[u8]) -> Result<ResponseParts> {
    let (head, body) = split_head(data)?;
    let mut lines = head.split("\r\n");

    let status_line = lines
        .next()
        .ok_or_else(|| CoreError::bad_encoding("missing status line"))?;
    let mut parts = status_line.splitn(3, ' ');
    let _version = parts
        .next()
        .ok_or_else(|| CoreError::bad_encoding("missing http version"))?;
    let status: u16 = parts
        .next()
        .ok_or_else(|| CoreError::bad_encoding("missing status code"))?
        .parse()
        .map_err(|_| CoreError::bad_encoding("invalid status code"))?;
    let reason = parts.next().unwrap_or("").to_string();

    let headers: Vec<String> = lines
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect();

    let body = body_slice(&headers, body);

    Ok(ResponseParts {
        status,
        reason,
        headers,
        body,
    })
}

/// Case-insensitive lookup of a header value in `Name: Value` lines.
///
/// Returns the trimmed value of the first matching line.
pub fn header_value<'a>(headers: &'a [String], name: &str) -> Option<&'a str> {
    headers.iter().find_map(|line| {
        let (n, v) = line.split_once(':')?;
        if n.trim().eq_ignore_ascii_case(name) {
            Some(v.trim())
        } else {
            None
        }
    })
}

/// `host[:port]` portion of a URL, mirroring what a browser puts in `Host`.
pub fn url_authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(p) => format!("{}:{}", host, p),
        None => host.to_string(),
    }
}

fn split_head(data: &[u8]) -> Result<(&str, &[u8])> {
    let pos = find_subsequence(data, b"\r\n\r\n")
        .ok_or_else(|| CoreError::bad_encoding("missing end of headers"))?;
    let head = std::str::from_utf8(&data[..pos])
        .map_err(|_| CoreError::bad_encoding("non-utf8 header block"))?;
    Ok((head, &data[pos + 4..]))
}

fn body_slice(headers: &[String], body: &[u8]) -> Vec<u8> {
    // Trust Content-Length when present; otherwise take the remainder.
    match header_value(headers, "content-length").and_then(|v| v.parse::<usize>().ok()) {
        Some(len) if len <= body.len() => body[..len].to_vec(),
        _ => body.to_vec(),
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
