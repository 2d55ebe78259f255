//! Repository discovery and per-peer response lookup.

use std::sync::{Arc, Mutex};

use cid::Cid;
use multiaddr::Multiaddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use gemipfs_net::{Transport, REPO_PROTOCOL};
use gemipfs_store::cache::LruMap;

use crate::lookup::{IndexLookup, DEFAULT_INDEX_URL};
use crate::{Result, RouterError};

/// Upper bound on a peer's lookup reply (a CID, with headroom).
const MAX_REPLY_LEN: u64 = 256;

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Slots in the per-domain repository cache.
    pub cache_size: usize,
    /// Content index endpoint.
    pub index_url: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cache_size: 1024,
            index_url: DEFAULT_INDEX_URL.to_string(),
        }
    }
}

/// Finds repositories for a domain and asks them about specific requests.
pub struct Router {
    transport: Arc<dyn Transport>,
    cache: Mutex<LruMap<String, Vec<Multiaddr>>>,
    lookup: IndexLookup,
}

impl Router {
    /// Build a router over the given transport.
    pub fn new(transport: Arc<dyn Transport>, config: RouterConfig) -> Self {
        Self {
            transport,
            cache: Mutex::new(LruMap::new(config.cache_size)),
            lookup: IndexLookup::new(&config.index_url),
        }
    }

    /// Repositories that may know this domain.
    ///
    /// Cached per domain CID; on a miss the content index is queried with the
    /// domain's multihash. Lookup failures degrade to an empty peer list so
    /// the caller can escalate to a fresh relay fetch.
    pub async fn find_repos(&self, domain: &Cid) -> Vec<Multiaddr> {
        let key = domain.to_string();
        if let Some(cached) = self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return cached;
        }

        let addrs = match self.lookup.find(&domain.hash().to_bytes()).await {
            Ok(addrs) => addrs,
            Err(e) => {
                warn!("Index lookup for {} failed: {}", domain, e);
                return Vec::new();
            }
        };

        debug!("Found {} repos for {}", addrs.len(), domain);
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, addrs.clone());
        addrs
    }

    /// Ask one repository peer whether it holds a response for `request`.
    ///
    /// The request CID is written to a `/gemipfs/repo/0.0.1` stream; the peer
    /// answers with the response CID bytes, or closes empty on a miss.
    pub async fn find_response_in_repo(
        &self,
        request: &Cid,
        repo: &Multiaddr,
    ) -> Result<Cid> {
        let mut stream = self.transport.dial(repo, REPO_PROTOCOL).await?;
        stream.write_all(&request.to_bytes()).await?;
        stream.shutdown().await?;

        let mut reply = Vec::new();
        stream.take(MAX_REPLY_LEN).read_to_end(&mut reply).await?;

        if reply.is_empty() {
            return Err(RouterError::NoResponse);
        }
        Cid::try_from(reply.as_slice())
            .map_err(|e| RouterError::BadReply(format!("reply cid: {}", e)))
    }
}
