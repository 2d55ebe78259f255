//! Exit stream handler.
//!
//! Lifecycle per stream: read the wire query, decrypt with the relay
//! identity, execute the origin fetch under a hard timeout, seal and upload
//! the transcript, then answer with the attestation. Envelope failures close
//! the stream silently; fetch and upload failures are logged and the stream
//! closes without an attestation.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use gemipfs_core::{DecodedQuery, Response, WireQuery};
use gemipfs_crypto::{decrypt_query, Attestation, Attester, IdentityKey, PublicIdentity};
use gemipfs_net::BoxStream;

use crate::{RelayError, Result};

/// Largest wire query accepted from a stream.
const MAX_QUERY_LEN: u64 = 4 * 1024 * 1024;

/// Exit relay configuration.
#[derive(Debug, Clone)]
pub struct ExitConfig {
    /// Hard timeout for the outbound origin fetch.
    pub fetch_timeout: Duration,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Handles `/exit/0.0.1` streams for one relay identity.
pub struct ExitHandler {
    attester: Attester,
    http: reqwest::Client,
}

impl ExitHandler {
    /// Build a handler around the relay identity.
    pub fn new(identity: IdentityKey, config: ExitConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            attester: Attester::new(identity),
            http,
        }
    }

    /// The relay's public identity (served on the id protocol).
    pub fn public(&self) -> PublicIdentity {
        self.attester.public()
    }

    /// Drive one exit stream to completion.
    pub async fn handle_stream(&self, mut stream: BoxStream) {
        let mut raw = Vec::new();
        if let Err(e) = (&mut stream).take(MAX_QUERY_LEN).read_to_end(&mut raw).await {
            warn!("Could not read query: {}", e);
            return;
        }

        let wire = match WireQuery::from_bytes(&raw) {
            Ok(wire) => wire,
            Err(e) => {
                warn!("Could not parse query: {}", e);
                return;
            }
        };

        // A query we cannot decrypt was never meant for us; close silently.
        let query = match decrypt_query(&wire, self.attester.identity()) {
            Ok(query) => query,
            Err(e) => {
                debug!("Could not decrypt query: {}", e);
                return;
            }
        };

        let attestation = match self.execute(&query).await {
            Ok(attestation) => attestation,
            Err(e) => {
                warn!("Exit fetch for {} failed: {}", query.request.url(), e);
                return;
            }
        };

        match attestation.to_bytes() {
            Ok(bytes) => {
                if let Err(e) = stream.write_all(&bytes).await {
                    warn!("Failed to write attestation: {}", e);
                }
            }
            Err(e) => warn!("Failed to encode attestation: {}", e),
        }
    }

    /// Fetch, seal, upload; returns the attestation to put on the stream.
    async fn execute(&self, query: &DecodedQuery) -> Result<Attestation> {
        info!("going to fetch {}", query.request.url());

        let response = self.fetch_origin(query).await?;

        let (attestation, sealed) = self.attester.attest(&response)?;

        // Push the sealed response to the repository named in the query,
        // binding it to the request CID so the repo can answer lookups.
        let status = self
            .http
            .post(query.repo.as_str())
            .query(&[("request", attestation.request.to_string())])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(sealed)
            .send()
            .await
            .map_err(|e| RelayError::RepoUnavailable(e.to_string()))?
            .status();
        if !status.is_success() {
            return Err(RelayError::RepoUnavailable(format!(
                "repository returned {}",
                status
            )));
        }

        info!(
            "finished request for {} -> {}",
            query.request.url(),
            attestation.response
        );
        Ok(attestation)
    }

    async fn fetch_origin(&self, query: &DecodedQuery) -> Result<Response> {
        let request = &query.request;
        let method = reqwest::Method::from_bytes(request.method().as_bytes())
            .map_err(|e| RelayError::UpstreamFetchFailed(e.to_string()))?;

        let mut builder = self.http.request(method, request.url().as_str());
        for line in request.headers() {
            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                // The client owns connection-level headers.
                if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length")
                {
                    continue;
                }
                builder = builder.header(name, value.trim());
            }
        }
        if !request.body().is_empty() {
            builder = builder.body(request.body().to_vec());
        }

        let upstream = builder
            .send()
            .await
            .map_err(|e| RelayError::UpstreamFetchFailed(e.to_string()))?;

        let status = upstream.status();
        let reason = status.canonical_reason().unwrap_or("").to_string();
        let headers: Vec<String> = upstream
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                // The client already collapsed transfer framing; recording it
                // would corrupt the archived dump.
                if name == reqwest::header::TRANSFER_ENCODING
                    || name == reqwest::header::CONNECTION
                {
                    return None;
                }
                value.to_str().ok().map(|v| format!("{}: {}", name, v))
            })
            .collect();
        let body = upstream
            .bytes()
            .await
            .map_err(|e| RelayError::UpstreamFetchFailed(e.to_string()))?;

        debug!(
            "Origin answered {} with {} bytes for {}",
            status,
            body.len(),
            request.url()
        );

        Ok(Response::from_http(
            query.resource,
            request,
            status.as_u16(),
            &reason,
            &headers,
            &body,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemipfs_crypto::encrypt_query;
    use tokio::io::duplex;
    use url::Url;

    fn handler() -> ExitHandler {
        ExitHandler::new(IdentityKey::generate_ed25519(), ExitConfig::default())
    }

    #[test]
    fn test_default_fetch_timeout() {
        let config = ExitConfig::default();
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_garbage_query_closes_silently() {
        let exit = handler();
        let (client, server) = duplex(4096);
        let mut client = client;

        tokio::spawn(async move {
            client.write_all(&[0x00, 0x01, 0x02]).await.unwrap();
            client.shutdown().await.unwrap();
            let mut reply = Vec::new();
            client.read_to_end(&mut reply).await.unwrap();
            assert!(reply.is_empty());
        });

        exit.handle_stream(Box::new(server)).await;
    }

    #[tokio::test]
    async fn test_foreign_envelope_closes_silently() {
        let exit = handler();
        let other_relay = IdentityKey::generate_ed25519();

        let request = gemipfs_core::Request::wrap(
            "GET",
            Url::parse("https://example.org/").unwrap(),
            Vec::new(),
            Vec::new(),
        )
        .canonicalize();
        let query = DecodedQuery::new(request, Url::parse("http://127.0.0.1:1/").unwrap());
        // Sealed toward a different relay's key.
        let wire = encrypt_query(&query, &other_relay.public()).unwrap();

        let (client, server) = duplex(64 * 1024);
        let mut client = client;
        let wire_bytes = wire.to_bytes();

        tokio::spawn(async move {
            client.write_all(&wire_bytes).await.unwrap();
            client.shutdown().await.unwrap();
            let mut reply = Vec::new();
            client.read_to_end(&mut reply).await.unwrap();
            assert!(reply.is_empty());
        });

        exit.handle_stream(Box::new(server)).await;
    }
}
