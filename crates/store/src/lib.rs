//! gemipfs Archive Store
//!
//! Sealed responses are persisted as single-root content-addressable archive
//! (CAR) files. The store keeps a bounded, age-limited collection of archives,
//! each with a block-offset index, and serves raw block bytes by CID.

pub mod cache;
pub mod car;
mod store;

pub use store::{CarStore, DEFAULT_CAPACITY, DEFAULT_MAX_AGE, DEFAULT_SHORTCUT_SLOTS};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Archive must have exactly one root, found {0}")]
    MultipleRoots(usize),

    #[error("Block not found")]
    NotFound,

    #[error("Bad archive: {0}")]
    BadArchive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
