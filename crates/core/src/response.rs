//! Response transcripts.
//!
//! A transcript is the archived exchange: a WARC request record followed by a
//! WARC response record, each wrapping the full HTTP dump. Transcripts are
//! immutable once produced; sealing and unsealing live in the crypto layer.

use std::time::Duration;

use chrono::Utc;
use cid::Cid;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::httpwire::{self, ResponseParts};
use crate::request::Request;
use crate::warc::WarcRecord;

/// Advisory lifetime for responses without cache headers.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(300);

/// An archived HTTP exchange bound to the resource CID that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Resource CID of the originating canonical request.
    pub query: Cid,
    /// WARC request record + WARC response record.
    pub transcript: Vec<u8>,
}

impl Response {
    /// Build a transcript from a live fetch result.
    pub fn from_http(
        query: Cid,
        request: &Request,
        status: u16,
        reason: &str,
        headers: &[String],
        body: &[u8],
    ) -> Self {
        let dump = httpwire::dump_response(status, reason, headers, body);
        let record = WarcRecord::new(
            "response",
            request.url().as_str(),
            &httpwire::url_authority(request.url()),
            Utc::now(),
            &Uuid::new_v4(),
            dump,
        );

        let mut transcript = request.serialize();
        transcript.extend_from_slice(&record.encode());

        Self { query, transcript }
    }

    /// Rehydrate a response from stored transcript bytes.
    pub fn from_transcript(query: Cid, transcript: Vec<u8>) -> Self {
        Self { query, transcript }
    }

    /// Parse the archived response record back into HTTP response parts.
    pub fn to_http(&self) -> Result<ResponseParts> {
        let record = self.response_record()?;
        httpwire::parse_response(&record.content)
    }

    /// The archived request half of the exchange.
    pub fn request(&self) -> Result<Request> {
        Request::parse(&self.transcript)
    }

    /// Advisory time-to-live for this response.
    ///
    /// Reads `Cache-Control: max-age` from the archived response headers;
    /// absent or unparsable headers fall back to [`DEFAULT_EXPIRY`].
    pub fn expiry(&self) -> Duration {
        let Ok(parts) = self.to_http() else {
            return DEFAULT_EXPIRY;
        };
        let Some(cache_control) = httpwire::header_value(&parts.headers, "cache-control") else {
            return DEFAULT_EXPIRY;
        };
        cache_control
            .split(',')
            .filter_map(|directive| {
                let directive = directive.trim();
                directive
                    .strip_prefix("max-age=")
                    .and_then(|v| v.parse::<u64>().ok())
            })
            .next()
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_EXPIRY)
    }

    fn response_record(&self) -> Result<WarcRecord> {
        let (first, consumed) = WarcRecord::decode(&self.transcript)?;
        if first.header("WARC-Type") == Some("response") {
            return Ok(first);
        }
        let (second, _) = WarcRecord::decode(&self.transcript[consumed..])?;
        if second.header("WARC-Type") == Some("response") {
            Ok(second)
        } else {
            Err(CoreError::bad_encoding("transcript has no response record"))
        }
    }
}
