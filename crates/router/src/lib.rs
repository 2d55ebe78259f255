//! gemipfs Router
//!
//! Matches requests to responses by priority:
//! 1. a sealed response already resident in the local archive store
//! 2. a previously made response in a known repository
//! 3. a response in a repository discovered through the content index
//! 4. a fresh fetch through a trusted relay (the caller's fallback)
//!
//! This crate covers tiers 2 and 3: the per-domain repository cache, the
//! content-index lookup, and the first-to-answer peer race.

mod first;
mod lookup;
mod router;

pub use first::with_first_to_resolve;
pub use lookup::IndexLookup;
pub use router::{Router, RouterConfig};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("No peers to query")]
    NoPeers,

    #[error("All peers failed to resolve the query")]
    AllFailed,

    #[error("Peer has no response for the query")]
    NoResponse,

    #[error("Index lookup failed: {0}")]
    Lookup(String),

    #[error("Bad peer reply: {0}")]
    BadReply(String),

    #[error(transparent)]
    Net(#[from] gemipfs_net::NetError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RouterError>;
