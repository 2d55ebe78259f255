//! WARC 1.1 record framing for response transcripts.
//!
//! Transcripts are standard web-archive records: a version line, named
//! headers, a blank line, the content block, and a two-CRLF trailer. Payload
//! digests use base32 SHA-1 in the `sha1:<digest>` form archives expect.

use chrono::{DateTime, SecondsFormat, Utc};
use data_encoding::BASE32;
use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::error::{CoreError, Result};

const VERSION_LINE: &str = "WARC/1.1";

/// A single WARC record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarcRecord {
    /// Record headers in write order.
    pub headers: Vec<(String, String)>,
    /// Content block (a full HTTP message dump).
    pub content: Vec<u8>,
}

impl WarcRecord {
    /// Build a `request` or `response` record around an HTTP dump.
    pub fn new(
        warc_type: &str,
        target_uri: &str,
        host: &str,
        date: DateTime<Utc>,
        record_id: &Uuid,
        content: Vec<u8>,
    ) -> Self {
        let digest = payload_digest(&content);
        let headers = vec![
            ("WARC-Type".to_string(), warc_type.to_string()),
            ("WARC-Payload-Digest".to_string(), digest.clone()),
            ("WARC-Block-Digest".to_string(), digest),
            ("WARC-Target-URI".to_string(), target_uri.to_string()),
            (
                "WARC-Date".to_string(),
                date.to_rfc3339_opts(SecondsFormat::Nanos, true),
            ),
            (
                "WARC-Record-ID".to_string(),
                format!("<urn:uuid:{}>", record_id),
            ),
            ("Host".to_string(), host.to_string()),
            (
                "Content-Type".to_string(),
                format!("application/http; msgtype={}", warc_type),
            ),
        ];
        Self { headers, content }
    }

    /// Look up a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The record's WARC-Date, when present and well-formed.
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.header("WARC-Date")
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|d| d.with_timezone(&Utc))
    }

    /// The record id parsed out of its `<urn:uuid:…>` wrapper.
    pub fn record_id(&self) -> Option<Uuid> {
        let raw = self.header("WARC-Record-ID")?;
        let raw = raw
            .strip_prefix("<urn:uuid:")
            .and_then(|r| r.strip_suffix('>'))
            .unwrap_or(raw);
        Uuid::parse_str(raw).ok()
    }

    /// Encode the record to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.content.len());
        out.extend_from_slice(VERSION_LINE.as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        out.extend_from_slice(format!("Content-Length: {}\r\n", self.content.len()).as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.content);
        out.extend_from_slice(b"\r\n\r\n");
        out
    }

    /// Decode one record from `data`, returning it and the bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let head_end = find_subsequence(data, b"\r\n\r\n")
            .ok_or_else(|| CoreError::bad_encoding("unterminated warc header block"))?;
        let head = std::str::from_utf8(&data[..head_end])
            .map_err(|_| CoreError::bad_encoding("non-utf8 warc header block"))?;

        let mut lines = head.split("\r\n");
        let version = lines
            .next()
            .ok_or_else(|| CoreError::bad_encoding("empty warc record"))?;
        if !version.starts_with("WARC/") {
            return Err(CoreError::bad_encoding("missing warc version line"));
        }

        let mut headers = Vec::new();
        let mut content_length: Option<usize> = None;
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| CoreError::bad_encoding("malformed warc header"))?;
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("Content-Length") {
                content_length = Some(
                    value
                        .parse()
                        .map_err(|_| CoreError::bad_encoding("invalid warc content length"))?,
                );
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length =
            content_length.ok_or_else(|| CoreError::bad_encoding("missing warc content length"))?;
        let content_start = head_end + 4;
        let content_end = content_start + content_length;
        if data.len() < content_end {
            return Err(CoreError::bad_encoding("truncated warc content"));
        }
        let content = data[content_start..content_end].to_vec();

        // Skip the record trailer if present.
        let mut consumed = content_end;
        if data[consumed..].starts_with(b"\r\n\r\n") {
            consumed += 4;
        }

        Ok((Self { headers, content }, consumed))
    }
}

/// `sha1:<base32>` digest of a content block.
pub fn payload_digest(content: &[u8]) -> String {
    let digest = Sha1::digest(content);
    format!("sha1:{}", BASE32.encode(&digest))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
