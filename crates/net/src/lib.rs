//! gemipfs Network Seam
//!
//! The overlay proper (authenticated peers, NAT traversal, stream muxing) is
//! an external collaborator; this crate pins down the seam the rest of the
//! system talks through: open a byte stream to a multiaddr for a named
//! protocol. A plain TCP implementation carries real deployments behind a
//! trusted overlay edge, and an in-memory implementation carries the tests.

mod memory;
mod tcp;

pub use memory::MemoryTransport;
pub use tcp::{TcpTransport, StreamListener};

use async_trait::async_trait;
use multiaddr::Multiaddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Stream protocol for relay exit queries.
pub const EXIT_PROTOCOL: &str = "/exit/0.0.1";

/// Stream protocol for repository response lookups.
pub const REPO_PROTOCOL: &str = "/gemipfs/repo/0.0.1";

/// Stream protocol for learning a listener's public identity.
pub const ID_PROTOCOL: &str = "/gemipfs/id/0.0.1";

/// Longest protocol tag accepted during stream setup.
pub const MAX_PROTOCOL_LEN: usize = 128;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Dial failed: {0}")]
    DialFailed(String),

    #[error("Unsupported multiaddr: {0}")]
    UnsupportedAddr(String),

    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NetError>;

/// A bidirectional byte stream.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// Boxed stream handed out by transports.
pub type BoxStream = Box<dyn Stream>;

/// Opens protocol-tagged streams to peers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Dial `addr` and negotiate `protocol`, returning the open stream.
    async fn dial(&self, addr: &Multiaddr, protocol: &str) -> Result<BoxStream>;
}
