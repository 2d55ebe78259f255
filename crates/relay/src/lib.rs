//! gemipfs Exit Relay
//!
//! Accepts encrypted queries over `/exit/0.0.1`, performs the live origin
//! fetch, seals the transcript into the requested repository, and answers
//! with a signed attestation.

mod handler;
mod server;

pub use handler::{ExitConfig, ExitHandler};
pub use server::serve;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Upstream fetch failed: {0}")]
    UpstreamFetchFailed(String),

    #[error("Repository unavailable: {0}")]
    RepoUnavailable(String),

    #[error(transparent)]
    Crypto(#[from] gemipfs_crypto::CryptoError),

    #[error(transparent)]
    Core(#[from] gemipfs_core::CoreError),

    #[error(transparent)]
    Net(#[from] gemipfs_net::NetError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
