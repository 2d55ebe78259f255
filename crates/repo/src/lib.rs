//! gemipfs Repository
//!
//! A dumb content-addressed blob store. Sealed responses arrive over plain
//! HTTP POST, are CID'd by the repository itself, and are served back by CID.
//! A side table of request → response bindings (fed by the uploader) backs
//! the peer lookup protocol; the repository never sees plaintext.

mod blockstore;
mod http;
mod peer;

pub use blockstore::FileBlockstore;
pub use http::{admin_router, public_router, serve_http};
pub use peer::serve_peer;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error(transparent)]
    Store(#[from] gemipfs_store::StoreError),

    #[error(transparent)]
    Net(#[from] gemipfs_net::NetError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RepoError>;
