//! Repository peer lookup protocol.
//!
//! Stream contract: the dialer writes a request CID and half-closes; the
//! repository answers with the bound response CID bytes, or closes empty on
//! a miss.

use std::net::SocketAddr;
use std::sync::Arc;

use cid::Cid;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use gemipfs_net::{BoxStream, StreamListener, REPO_PROTOCOL};

use crate::blockstore::FileBlockstore;
use crate::Result;

/// Largest request CID accepted on the lookup stream.
const MAX_REQUEST_LEN: u64 = 256;

/// Serve `/gemipfs/repo/0.0.1` lookups on `addr`.
pub async fn serve_peer(store: Arc<FileBlockstore>, addr: SocketAddr) -> Result<SocketAddr> {
    let listener = StreamListener::new().handle(REPO_PROTOCOL, move |stream| {
        let store = store.clone();
        async move {
            handle_lookup(store, stream).await;
        }
    });
    Ok(listener.serve(addr).await?)
}

async fn handle_lookup(store: Arc<FileBlockstore>, mut stream: BoxStream) {
    let mut raw = Vec::new();
    if let Err(e) = (&mut stream).take(MAX_REQUEST_LEN).read_to_end(&mut raw).await {
        warn!("Could not read lookup request: {}", e);
        return;
    }

    let request = match Cid::try_from(raw.as_slice()) {
        Ok(cid) => cid,
        Err(e) => {
            warn!("Bad lookup request cid: {}", e);
            return;
        }
    };

    match store.lookup(&request) {
        Some(response) => {
            debug!("Lookup hit {} -> {}", request, response);
            if let Err(e) = stream.write_all(&response.to_bytes()).await {
                warn!("Failed to answer lookup: {}", e);
            }
        }
        None => {
            debug!("Lookup miss for {}", request);
            // Close empty: the dialer reads EOF as "no response".
        }
    }
}
