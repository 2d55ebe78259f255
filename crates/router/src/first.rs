//! First-to-answer peer racing.

use std::sync::Arc;

use cid::Cid;
use multiaddr::Multiaddr;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::router::Router;
use crate::{Result, RouterError};

/// Race a response lookup across `peers`, returning the first hit.
///
/// One task per peer; the winner lands in a single-slot channel and trips a
/// shared cancellation signal. Losers that finish late find the slot taken
/// and drop their result; losers still in flight observe the signal and exit
/// without side effects. An empty peer list is `NoPeers`, and a race where
/// every task completes without a hit is `AllFailed` so the caller can
/// escalate to a fresh relay fetch.
pub async fn with_first_to_resolve(
    router: Arc<Router>,
    query: Cid,
    peers: &[Multiaddr],
) -> Result<Cid> {
    if peers.is_empty() {
        return Err(RouterError::NoPeers);
    }

    let (winner_tx, mut winner_rx) = mpsc::channel::<Cid>(1);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    for peer in peers {
        let router = router.clone();
        let peer = peer.clone();
        let winner = winner_tx.clone();
        let mut cancel = cancel_rx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.changed() => {
                    debug!("Race cancelled for {}", peer);
                }
                result = router.find_response_in_repo(&query, &peer) => {
                    if let Ok(cid) = result {
                        // Slot taken means someone else already won.
                        let _ = winner.try_send(cid);
                    }
                }
            }
        });
    }
    // Only task handles keep the channel open now; when every peer finishes
    // without delivering, recv() observes the close.
    drop(winner_tx);

    match winner_rx.recv().await {
        Some(cid) => {
            let _ = cancel_tx.send(true);
            Ok(cid)
        }
        None => Err(RouterError::AllFailed),
    }
}
