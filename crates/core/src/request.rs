//! Canonical request model and fingerprinting.

use chrono::{DateTime, Utc};
use cid::Cid;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::cid as cids;
use crate::error::{CoreError, Result};
use crate::httpwire;
use crate::warc::WarcRecord;

/// An intercepted HTTP request with its body fully buffered.
///
/// The record is immutable once wrapped; fingerprints depend only on the
/// canonical fields, never on the capture time or record id.
#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    url: Url,
    headers: Vec<String>,
    body: Vec<u8>,
    received_at: DateTime<Utc>,
    record_id: Uuid,
}

/// The canonical record fed to the deterministic encoder.
#[derive(Serialize, Deserialize)]
struct CanonicalRecord {
    method: String,
    url: String,
    headers: Vec<String>,
    body: Vec<u8>,
}

impl Request {
    /// Wrap an intercepted request.
    ///
    /// `headers` are whole `Name: Value` lines; repeated names stay as
    /// separate entries in their original order.
    pub fn wrap(method: &str, url: Url, headers: Vec<String>, body: Vec<u8>) -> Self {
        Self {
            method: method.to_string(),
            url,
            headers,
            body,
            received_at: Utc::now(),
            record_id: Uuid::new_v4(),
        }
    }

    /// Normalize the request so equivalent fetches fingerprint identically.
    ///
    /// Idempotent by contract. The baseline transform is the identity; this
    /// is the hook where volatile headers (user agents, cookies, negotiated
    /// languages) get stripped and cache-sensitive dates get quantized once
    /// an allow-list is settled.
    pub fn canonicalize(self) -> Self {
        self
    }

    /// The resource fingerprint: CID over the canonical record encoding.
    ///
    /// Headers are ordered by name for the encoding (stable sort, so repeated
    /// names keep their insertion order), making the fingerprint invariant to
    /// reordering across distinct header names.
    pub fn fingerprint(&self) -> Cid {
        let mut headers = self.headers.clone();
        headers.sort_by_key(|line| header_name(line));
        let record = CanonicalRecord {
            method: self.method.clone(),
            url: self.url.to_string(),
            headers,
            body: self.body.clone(),
        };
        let encoded = bincode::serialize(&record).expect("canonical record encodes");
        cids::sum(&encoded)
    }

    /// Routing key for "who knows about this origin": CID over
    /// `scheme://host/`.
    pub fn domain_hash(&self) -> Cid {
        let base = format!(
            "{}://{}/",
            self.url.scheme(),
            httpwire::url_authority(&self.url)
        );
        let encoded = bincode::serialize(&base).expect("domain string encodes");
        cids::sum(&encoded)
    }

    /// Serialize as a WARC request record wrapping the HTTP dump.
    pub fn serialize(&self) -> Vec<u8> {
        let dump = httpwire::dump_request(&self.method, &self.url, &self.headers, &self.body);
        WarcRecord::new(
            "request",
            self.url.as_str(),
            &httpwire::url_authority(&self.url),
            self.received_at,
            &self.record_id,
            dump,
        )
        .encode()
    }

    /// Parse a serialized request record back into a `Request`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (record, _) = WarcRecord::decode(data)?;
        let target_uri = record
            .header("WARC-Target-URI")
            .ok_or_else(|| CoreError::bad_encoding("request record missing target uri"))?;
        let url = Url::parse(target_uri)?;
        let received_at = record.date().unwrap_or_else(Utc::now);
        let record_id = record.record_id().unwrap_or_else(Uuid::new_v4);

        let parts = httpwire::parse_request(&record.content)?;

        Ok(Self {
            method: parts.method,
            url,
            headers: parts.headers,
            body: parts.body,
            received_at,
            record_id,
        })
    }

    /// HTTP method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Absolute request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Header lines in insertion order.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Buffered request body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

fn header_name(line: &str) -> String {
    line.split_once(':')
        .map(|(n, _)| n.trim().to_ascii_lowercase())
        .unwrap_or_else(|| line.trim().to_ascii_lowercase())
}
