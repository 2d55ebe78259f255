//! In-memory transport for tests.
//!
//! Registered handlers play the listener side of a duplex pipe, keyed by
//! (multiaddr, protocol). Dialing an unregistered address fails the way a
//! dead peer would.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use multiaddr::Multiaddr;

use crate::{BoxStream, NetError, Result, Transport};

type Handler = Arc<
    dyn Fn(BoxStream) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        + Send
        + Sync,
>;

/// Test transport wiring dials straight to in-process handlers.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    handlers: Arc<Mutex<HashMap<(String, String), Handler>>>,
}

impl MemoryTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` as the peer behind `addr` for `protocol`.
    pub fn register<F, Fut>(&self, addr: &Multiaddr, protocol: &str, handler: F)
    where
        F: Fn(BoxStream) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.handlers.lock().unwrap().insert(
            (addr.to_string(), protocol.to_string()),
            Arc::new(move |s| Box::pin(handler(s))),
        );
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn dial(&self, addr: &Multiaddr, protocol: &str) -> Result<BoxStream> {
        let handler = self
            .handlers
            .lock()
            .unwrap()
            .get(&(addr.to_string(), protocol.to_string()))
            .cloned()
            .ok_or_else(|| NetError::DialFailed(format!("{} ({})", addr, protocol)))?;

        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            handler(Box::new(server)).await;
        });
        Ok(Box::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn addr() -> Multiaddr {
        "/ip4/127.0.0.1/tcp/7777".parse().unwrap()
    }

    #[tokio::test]
    async fn test_registered_handler_answers() {
        let transport = MemoryTransport::new();
        transport.register(&addr(), "/echo/1", |mut stream| async move {
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
        });

        let mut stream = transport.dial(&addr(), "/echo/1").await.unwrap();
        stream.write_all(b"hello").await.unwrap();
        stream.shutdown().await.unwrap();

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"hello");
    }

    #[tokio::test]
    async fn test_unregistered_dial_fails() {
        let transport = MemoryTransport::new();
        let result = transport.dial(&addr(), "/echo/1").await;
        assert!(matches!(result, Err(NetError::DialFailed(_))));
    }

    #[tokio::test]
    async fn test_protocols_are_isolated() {
        let transport = MemoryTransport::new();
        transport.register(&addr(), "/a/1", |mut stream| async move {
            stream.write_all(b"a").await.unwrap();
        });

        assert!(transport.dial(&addr(), "/a/1").await.is_ok());
        assert!(transport.dial(&addr(), "/b/1").await.is_err());
    }
}
