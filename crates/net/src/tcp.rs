//! TCP transport and listener.
//!
//! Streams open with a newline-terminated protocol tag, after which the raw
//! bytes belong to the protocol handler. Multiaddrs are dialed through their
//! `/ip4|ip6|dns4/.../tcp/<port>` components; a trailing `/p2p/<peer>`
//! component is identity metadata and is ignored for dialing.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use multiaddr::{Multiaddr, Protocol};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::{BoxStream, NetError, Result, Transport, MAX_PROTOCOL_LEN};

/// Dials peers over plain TCP.
#[derive(Debug, Default, Clone)]
pub struct TcpTransport;

impl TcpTransport {
    /// Create a TCP transport.
    pub fn new() -> Self {
        Self
    }

    /// Extract a dialable socket address from a multiaddr.
    pub fn socket_addr(addr: &Multiaddr) -> Result<String> {
        let mut host: Option<String> = None;
        let mut port: Option<u16> = None;
        for component in addr.iter() {
            match component {
                Protocol::Ip4(ip) => host = Some(ip.to_string()),
                Protocol::Ip6(ip) => host = Some(ip.to_string()),
                Protocol::Dns4(name) | Protocol::Dns(name) => host = Some(name.to_string()),
                Protocol::Tcp(p) => port = Some(p),
                // Identity metadata, not part of the dial target.
                Protocol::P2p(_) => {}
                _ => {}
            }
        }
        match (host, port) {
            (Some(h), Some(p)) => Ok(format!("{}:{}", h, p)),
            _ => Err(NetError::UnsupportedAddr(addr.to_string())),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn dial(&self, addr: &Multiaddr, protocol: &str) -> Result<BoxStream> {
        let target = Self::socket_addr(addr)?;
        let mut stream = TcpStream::connect(&target)
            .await
            .map_err(|e| NetError::DialFailed(format!("{}: {}", target, e)))?;

        stream
            .write_all(format!("{}\n", protocol).as_bytes())
            .await
            .map_err(|e| NetError::Stream(e.to_string()))?;

        debug!("Dialed {} for {}", target, protocol);
        Ok(Box::new(stream))
    }
}

type Handler = Arc<
    dyn Fn(BoxStream) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        + Send
        + Sync,
>;

/// Accepts protocol-tagged streams and dispatches them to handlers.
pub struct StreamListener {
    handlers: Vec<(String, Handler)>,
}

impl StreamListener {
    /// Create a listener with no handlers registered.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register `handler` for streams negotiating `protocol`.
    pub fn handle<F, Fut>(mut self, protocol: &str, handler: F) -> Self
    where
        F: Fn(BoxStream) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.handlers
            .push((protocol.to_string(), Arc::new(move |s| Box::pin(handler(s)))));
        self
    }

    /// Bind `addr` and serve forever; returns the bound address immediately.
    pub async fn serve(self, addr: SocketAddr) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!("Stream listener on {}", local);

        let handlers = Arc::new(self.handlers);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let handlers = handlers.clone();
                        tokio::spawn(async move {
                            if let Err(e) = dispatch(stream, &handlers).await {
                                debug!("Stream from {} ended: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
        });

        Ok(local)
    }
}

impl Default for StreamListener {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch(stream: TcpStream, handlers: &[(String, Handler)]) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let mut protocol = String::new();

    // Bounded read of the protocol tag line.
    loop {
        let buf = reader
            .fill_buf()
            .await
            .map_err(|e| NetError::Stream(e.to_string()))?;
        if buf.is_empty() {
            return Err(NetError::Stream("closed before protocol tag".into()));
        }
        let newline = buf.iter().position(|&b| b == b'\n');
        let take = newline.map(|i| i + 1).unwrap_or(buf.len());
        protocol.push_str(
            std::str::from_utf8(&buf[..take])
                .map_err(|_| NetError::Stream("non-utf8 protocol tag".into()))?,
        );
        reader.consume(take);
        if newline.is_some() {
            break;
        }
        if protocol.len() > MAX_PROTOCOL_LEN {
            return Err(NetError::Stream("protocol tag too long".into()));
        }
    }
    let protocol = protocol.trim_end().to_string();

    let handler = handlers
        .iter()
        .find(|(name, _)| *name == protocol)
        .map(|(_, h)| h.clone())
        .ok_or(NetError::UnknownProtocol(protocol))?;

    handler(Box::new(reader)).await;
    Ok(())
}
