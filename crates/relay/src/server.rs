//! Relay stream server.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::warn;

use gemipfs_net::{StreamListener, EXIT_PROTOCOL, ID_PROTOCOL};

use crate::handler::ExitHandler;
use crate::Result;

/// Serve the exit and identity protocols on `addr`.
///
/// Returns the bound address; the accept loop runs in the background.
pub async fn serve(handler: Arc<ExitHandler>, addr: SocketAddr) -> Result<SocketAddr> {
    let exit = handler.clone();
    let ident = handler.clone();

    let listener = StreamListener::new()
        .handle(EXIT_PROTOCOL, move |stream| {
            let exit = exit.clone();
            async move {
                exit.handle_stream(stream).await;
            }
        })
        .handle(ID_PROTOCOL, move |mut stream| {
            let ident = ident.clone();
            async move {
                match ident.public().to_bytes() {
                    Ok(bytes) => {
                        if let Err(e) = stream.write_all(&bytes).await {
                            warn!("Failed to write identity: {}", e);
                        }
                    }
                    Err(e) => warn!("Failed to encode identity: {}", e),
                }
            }
        });

    Ok(listener.serve(addr).await?)
}
