//! gemipfs Crypto
//!
//! Identity key handling, the hybrid query envelope, symmetric transcript
//! sealing, and relay attestations.

mod attest;
mod envelope;
mod keys;
mod keystore;
mod seal;

pub use attest::{Attestation, Attester};
pub use envelope::{decrypt_query, encrypt_query};
pub use keys::{IdentityKey, PublicIdentity};
pub use keystore::load_or_generate_identity;
pub use seal::{open_response, open_transcript, seal_response, seal_transcript};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Envelope decryption failed")]
    BadEnvelope,

    #[error("Unsupported key type: {0}")]
    UnsupportedKey(String),

    #[error("Sealed response failed to open")]
    SealOpenFailed,

    #[error("Attestation signature or binding invalid")]
    AttestationInvalid,

    #[error("Bad encoding: {0}")]
    BadEncoding(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error(transparent)]
    Core(#[from] gemipfs_core::CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
