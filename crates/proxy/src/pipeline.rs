//! Tiered response resolution.
//!
//! Per request: wrap → canonicalize → fingerprint, then resolve by priority.
//! Tier 1 is a sealed response already on disk (tracked through recent
//! request → response bindings), tiers 2 and 3 race known and discovered
//! repositories, and tier 4 seals the query toward the relay for a fresh
//! fetch. Attestations are verified before anything is committed locally.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use cid::Cid;
use multiaddr::{Multiaddr, Protocol};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use url::Url;

use gemipfs_core::httpwire::ResponseParts;
use gemipfs_core::{DecodedQuery, Request, Response};
use gemipfs_crypto::{encrypt_query, open_response, Attestation, PublicIdentity};
use gemipfs_net::{Transport, EXIT_PROTOCOL, ID_PROTOCOL};
use gemipfs_router::{with_first_to_resolve, Router, RouterError};
use gemipfs_store::{car, CarStore};

use crate::{ProxyError, Result};

/// Largest identity reply accepted from the relay.
const MAX_IDENTITY_LEN: u64 = 4096;

/// Largest attestation reply accepted from the relay.
const MAX_ATTESTATION_LEN: u64 = 4096;

/// Proxy pipeline configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Multiaddr of the trusted relay.
    pub relay_addr: Multiaddr,
    /// Repository the relay should upload into (and we fetch from).
    pub repo_url: Url,
}

struct RecentBinding {
    response: Cid,
    expires_at: Instant,
}

/// Resolves intercepted requests into archived responses.
pub struct Pipeline {
    transport: Arc<dyn Transport>,
    router: Arc<Router>,
    store: Arc<CarStore>,
    http: reqwest::Client,
    config: ProxyConfig,
    relay_identity: Mutex<Option<PublicIdentity>>,
    recent: Mutex<HashMap<Cid, RecentBinding>>,
}

impl Pipeline {
    /// Assemble a pipeline over shared transport, router and store.
    pub fn new(
        transport: Arc<dyn Transport>,
        router: Arc<Router>,
        store: Arc<CarStore>,
        config: ProxyConfig,
    ) -> Self {
        Self {
            transport,
            router,
            store,
            http: reqwest::Client::new(),
            config,
            relay_identity: Mutex::new(None),
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve one intercepted request into HTTP response parts.
    pub async fn handle(
        &self,
        method: &str,
        url: Url,
        headers: Vec<String>,
        body: Vec<u8>,
    ) -> Result<ResponseParts> {
        let request = Request::wrap(method, url, headers, body).canonicalize();
        let resource = request.fingerprint();
        let domain = request.domain_hash();

        // Tier 1: a sealed response we already hold.
        if let Some(response) = self.resolve_local(&resource) {
            debug!("Serving {} from the local store", resource);
            return Ok(response.to_http()?);
        }

        // Tiers 2 and 3: race known and discovered repositories.
        let peers = self.router.find_repos(&domain).await;
        match with_first_to_resolve(self.router.clone(), resource, &peers).await {
            Ok(winner) => match self.resolve_sealed(resource, winner).await {
                Ok(response) => {
                    self.commit(resource, winner, &response);
                    return Ok(response.to_http()?);
                }
                Err(e) => {
                    // A blob we cannot fetch or open is a cache miss.
                    debug!("Race winner {} unusable: {}", winner, e);
                }
            },
            Err(RouterError::NoPeers) | Err(RouterError::AllFailed) => {}
            Err(e) => {
                debug!("Peer race failed: {}", e);
            }
        }

        // Tier 4: fresh fetch through the relay.
        info!("going to relay for {}", domain);
        let response = self.relay_fetch(request, resource).await?;
        Ok(response.to_http()?)
    }

    /// Tier 1: recent binding plus archive store.
    fn resolve_local(&self, resource: &Cid) -> Option<Response> {
        let response_cid = {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            match recent.get(resource) {
                Some(binding) if binding.expires_at > Instant::now() => Some(binding.response),
                Some(_) => {
                    recent.remove(resource);
                    None
                }
                None => None,
            }
        }?;

        let sealed = self.store.get(&response_cid).ok()?;
        open_response(*resource, &sealed).ok()
    }

    /// Fetch sealed bytes for a race winner: local store, then repository.
    async fn resolve_sealed(&self, resource: Cid, winner: Cid) -> Result<Response> {
        let sealed = match self.store.get(&winner) {
            Ok(sealed) => sealed,
            Err(_) => self.fetch_repo_blob(&winner).await?,
        };
        Ok(open_response(resource, &sealed)?)
    }

    /// Tier 4: seal the query toward the relay and verify what comes back.
    async fn relay_fetch(&self, request: Request, resource: Cid) -> Result<Response> {
        let relay_identity = self.relay_identity().await?;

        let query = DecodedQuery::new(request, self.config.repo_url.clone());
        let wire = encrypt_query(&query, &relay_identity)?;

        let mut stream = self
            .transport
            .dial(&self.config.relay_addr, EXIT_PROTOCOL)
            .await?;
        stream.write_all(&wire.to_bytes()).await?;
        stream.shutdown().await?;

        let mut reply = Vec::new();
        (&mut stream)
            .take(MAX_ATTESTATION_LEN)
            .read_to_end(&mut reply)
            .await?;
        if reply.is_empty() {
            return Err(ProxyError::UpstreamFetchFailed(
                "relay closed without an attestation".into(),
            ));
        }

        let attestation = Attestation::from_bytes(&reply)?;
        // Nothing is committed before the signature and binding check out.
        if attestation.request != resource || !attestation.verify(&relay_identity) {
            return Err(ProxyError::AttestationInvalid);
        }
        debug!("attested {} -> {}", attestation.request, attestation.response);

        let sealed = self.fetch_repo_blob(&attestation.response).await?;
        let response = open_response(resource, &sealed)?;

        self.cache_sealed(&attestation.response, &sealed);
        self.commit(resource, attestation.response, &response);

        Ok(response)
    }

    /// GET sealed bytes from the configured repository.
    async fn fetch_repo_blob(&self, cid: &Cid) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(self.config.repo_url.as_str())
            .query(&[("cid", cid.to_string())])
            .send()
            .await
            .map_err(|e| ProxyError::RepoUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProxyError::RepoUnavailable(format!(
                "repository returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProxyError::RepoUnavailable(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    /// The relay's public identity, learned once and cached.
    ///
    /// A `/p2p/` component on the relay address is authoritative; otherwise
    /// the identity protocol is asked.
    async fn relay_identity(&self) -> Result<PublicIdentity> {
        if let Some(identity) = self
            .relay_identity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Ok(identity);
        }

        let identity = match self.relay_peer_from_addr() {
            Some(identity) => identity,
            None => self.fetch_relay_identity().await?,
        };

        *self
            .relay_identity
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(identity.clone());
        Ok(identity)
    }

    fn relay_peer_from_addr(&self) -> Option<PublicIdentity> {
        for component in self.config.relay_addr.iter() {
            if let Protocol::P2p(peer) = component {
                match PublicIdentity::from_peer_id(&peer) {
                    Ok(identity) => return Some(identity),
                    Err(e) => {
                        warn!("Relay peer id unusable: {}", e);
                        return None;
                    }
                }
            }
        }
        None
    }

    async fn fetch_relay_identity(&self) -> Result<PublicIdentity> {
        let mut stream = self
            .transport
            .dial(&self.config.relay_addr, ID_PROTOCOL)
            .await?;
        stream.shutdown().await?;

        let mut reply = Vec::new();
        stream.take(MAX_IDENTITY_LEN).read_to_end(&mut reply).await?;
        Ok(PublicIdentity::from_bytes(&reply)?)
    }

    /// Remember a verified binding and its advisory lifetime.
    fn commit(&self, resource: Cid, response_cid: Cid, response: &Response) {
        let expires_at = Instant::now() + response.expiry();
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                resource,
                RecentBinding {
                    response: response_cid,
                    expires_at,
                },
            );
    }

    /// Park sealed bytes in the archive store for tier 1.
    fn cache_sealed(&self, response_cid: &Cid, sealed: &[u8]) {
        let archive = car::single_block_archive(response_cid, sealed);
        if let Err(e) = self.store.add(&mut Cursor::new(archive)) {
            warn!("Could not cache sealed response {}: {}", response_cid, e);
        }
    }
}
