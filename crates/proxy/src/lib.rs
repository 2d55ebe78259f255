//! gemipfs Proxy
//!
//! The user-facing side of the fetch network. Intercepted requests are
//! canonicalized and fingerprinted, resolved through the tiered pipeline
//! (local store, known repositories, discovered repositories, fresh relay
//! fetch), decrypted, and returned as plain HTTP responses.

mod ca;
mod pipeline;
mod server;

pub use ca::{load_or_create_ca, CaMaterial};
pub use pipeline::{Pipeline, ProxyConfig};
pub use server::serve;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Attestation signature or binding invalid")]
    AttestationInvalid,

    #[error("Repository unavailable: {0}")]
    RepoUnavailable(String),

    #[error("Upstream fetch failed: {0}")]
    UpstreamFetchFailed(String),

    #[error("Certificate authority error: {0}")]
    Ca(String),

    #[error(transparent)]
    Crypto(#[from] gemipfs_crypto::CryptoError),

    #[error(transparent)]
    Core(#[from] gemipfs_core::CoreError),

    #[error(transparent)]
    Router(#[from] gemipfs_router::RouterError),

    #[error(transparent)]
    Net(#[from] gemipfs_net::NetError),

    #[error(transparent)]
    Store(#[from] gemipfs_store::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
