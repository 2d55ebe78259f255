//! gemipfs Core Types
//!
//! This crate defines the shared data model for the gemipfs fetch network:
//! content identifiers, the canonical request record and its fingerprint,
//! the WARC-framed response transcript, and the query wire framing.

pub mod cid;
mod error;
pub mod httpwire;
mod query;
mod request;
mod response;
pub mod warc;

pub use error::*;
pub use query::*;
pub use request::*;
pub use response::*;

pub use ::cid::Cid;
