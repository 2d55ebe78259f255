//! Query types and their wire framing.

use std::io::Cursor;

use cid::Cid;
use url::Url;

use crate::cid as cids;
use crate::error::{CoreError, Result};
use crate::request::Request;

/// A query in plaintext form: the fingerprint, the target repository, and the
/// canonical request itself. Lives only inside one endpoint, never persisted.
#[derive(Debug, Clone)]
pub struct DecodedQuery {
    /// Plaintext request fingerprint.
    pub resource: Cid,
    /// Repository the sealed response should land in.
    pub repo: Url,
    /// The canonical request.
    pub request: Request,
}

impl DecodedQuery {
    /// Build a query from a canonicalized request and target repository.
    pub fn new(request: Request, repo: Url) -> Self {
        let resource = request.fingerprint();
        Self {
            resource,
            repo,
            request,
        }
    }

    /// The resource CID this query asks about.
    pub fn cid(&self) -> Cid {
        self.resource
    }
}

/// A query in flight: the derived wire CID and the sealed envelope.
///
/// The plaintext resource CID never appears on the wire; only its derived
/// hash does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireQuery {
    /// Derived (second-preimage) identifier for the resource.
    pub resource: Cid,
    /// Hybrid-sealed `encode(request) || encode(repo)` payload.
    pub envelope: Vec<u8>,
}

impl WireQuery {
    /// Wire framing: `resource_cid_bytes || envelope_bytes`.
    ///
    /// No tag or length is written for the CID; its multihash length prefix
    /// makes it self-delimiting.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.resource.to_bytes();
        out.extend_from_slice(&self.envelope);
        out
    }

    /// Read a wire query back from its framing.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let resource = Cid::read_bytes(&mut cursor)
            .map_err(|e| CoreError::bad_encoding(format!("wire query cid: {}", e)))?;
        let envelope = data[cursor.position() as usize..].to_vec();
        if envelope.is_empty() {
            return Err(CoreError::bad_encoding("wire query has empty envelope"));
        }
        Ok(Self { resource, envelope })
    }

    /// Derive the wire CID for a plaintext resource CID.
    pub fn wire_cid(resource: &Cid) -> Cid {
        cids::derive(resource)
    }
}
