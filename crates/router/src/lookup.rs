//! Content-index lookup client.
//!
//! Queries an IPNI-style index over HTTP: `GET {base}/multihash/<b58>`
//! returns provider records for the queried multihash. Results whose
//! multihash does not match the query are dropped, and each provider's
//! addresses are flattened into peer-qualified multiaddrs.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use multiaddr::Multiaddr;
use multibase::Base;
use serde::Deserialize;
use tracing::debug;

use crate::{Result, RouterError};

/// Default public content index.
pub const DEFAULT_INDEX_URL: &str = "https://cid.contact";

#[derive(Deserialize)]
struct FindResponse {
    #[serde(rename = "MultihashResults", default)]
    multihash_results: Vec<MultihashResult>,
}

#[derive(Deserialize)]
struct MultihashResult {
    #[serde(rename = "Multihash")]
    multihash: String,
    #[serde(rename = "ProviderResults", default)]
    provider_results: Vec<ProviderResult>,
}

#[derive(Deserialize)]
struct ProviderResult {
    #[serde(rename = "Provider")]
    provider: ProviderInfo,
}

#[derive(Deserialize)]
struct ProviderInfo {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Addrs", default)]
    addrs: Vec<String>,
}

/// HTTP client for the content index.
pub struct IndexLookup {
    base_url: String,
    client: reqwest::Client,
}

impl IndexLookup {
    /// Point at an index endpoint (no trailing slash).
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Find providers for a multihash; a missing entry is an empty list.
    pub async fn find(&self, multihash: &[u8]) -> Result<Vec<Multiaddr>> {
        let encoded = Base::Base58Btc.encode(multihash);
        let url = format!("{}/multihash/{}", self.base_url, encoded);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RouterError::Lookup(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(RouterError::Lookup(format!(
                "index returned {}",
                response.status()
            )));
        }

        let body: FindResponse = response
            .json()
            .await
            .map_err(|e| RouterError::Lookup(e.to_string()))?;

        Ok(flatten_results(body, multihash))
    }
}

fn flatten_results(body: FindResponse, queried: &[u8]) -> Vec<Multiaddr> {
    let mut out = Vec::new();
    for result in body.multihash_results {
        // Drop results for anything but the multihash we asked about.
        match BASE64.decode(&result.multihash) {
            Ok(bytes) if bytes == queried => {}
            _ => continue,
        }
        for provider in result.provider_results {
            out.extend(provider_addrs(&provider.provider));
        }
    }
    debug!("Index lookup flattened {} provider addrs", out.len());
    out
}

fn provider_addrs(provider: &ProviderInfo) -> Vec<Multiaddr> {
    provider
        .addrs
        .iter()
        .filter_map(|addr| {
            let qualified = if addr.contains("/p2p/") {
                addr.clone()
            } else {
                format!("{}/p2p/{}", addr.trim_end_matches('/'), provider.id)
            };
            qualified.parse::<Multiaddr>().ok()
        })
        .collect()
}
