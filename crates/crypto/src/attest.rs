//! Relay attestations.
//!
//! After a live fetch the relay signs `request_cid.bytes || response_cid.bytes`
//! with its identity key, binding the question to the sealed answer. Holders
//! of the relay's public identity can verify the binding; unverified
//! attestations are never authoritative.

use cid::Cid;
use serde::{Deserialize, Serialize};
use tracing::debug;

use gemipfs_core::Response;

use crate::keys::{IdentityKey, PublicIdentity};
use crate::seal::seal_response;
use crate::{CryptoError, Result};

/// A signed request → response binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    /// Resource CID of the canonical request.
    pub request: Cid,
    /// CID of the sealed response bytes.
    pub response: Cid,
    /// Relay signature over `request.bytes || response.bytes`.
    pub signature: Vec<u8>,
}

/// Wire form of an attestation (CIDs as raw byte strings).
#[derive(Serialize, Deserialize)]
struct AttestationWire {
    request: Vec<u8>,
    response: Vec<u8>,
    signature: Vec<u8>,
}

impl Attestation {
    /// The byte string the signature covers.
    pub fn signable(request: &Cid, response: &Cid) -> Vec<u8> {
        let mut out = request.to_bytes();
        out.extend_from_slice(&response.to_bytes());
        out
    }

    /// Check the signature against a relay identity.
    pub fn verify(&self, relay: &PublicIdentity) -> bool {
        relay.verify(&Self::signable(&self.request, &self.response), &self.signature)
    }

    /// Deterministic binary encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let wire = AttestationWire {
            request: self.request.to_bytes(),
            response: self.response.to_bytes(),
            signature: self.signature.clone(),
        };
        bincode::serialize(&wire).map_err(|e| CryptoError::BadEncoding(e.to_string()))
    }

    /// Parse an attestation from its binary encoding.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let wire: AttestationWire =
            bincode::deserialize(data).map_err(|e| CryptoError::BadEncoding(e.to_string()))?;
        Ok(Self {
            request: Cid::try_from(wire.request.as_slice())
                .map_err(|e| CryptoError::BadEncoding(e.to_string()))?,
            response: Cid::try_from(wire.response.as_slice())
                .map_err(|e| CryptoError::BadEncoding(e.to_string()))?,
            signature: wire.signature,
        })
    }
}

/// Signs responses on behalf of a relay identity.
pub struct Attester {
    identity: IdentityKey,
}

impl Attester {
    /// Wrap a relay identity.
    pub fn new(identity: IdentityKey) -> Self {
        Self { identity }
    }

    /// The public half of the attesting identity.
    pub fn public(&self) -> PublicIdentity {
        self.identity.public()
    }

    /// The identity key itself (for envelope decryption).
    pub fn identity(&self) -> &IdentityKey {
        &self.identity
    }

    /// Seal a response and sign the request → response binding.
    ///
    /// Returns the attestation for the stream and the sealed bytes for the
    /// repository upload.
    pub fn attest(&self, response: &Response) -> Result<(Attestation, Vec<u8>)> {
        let (response_cid, sealed) = seal_response(response);
        let signature = self
            .identity
            .sign(&Attestation::signable(&response.query, &response_cid))?;

        debug!("attesting {} -> {}", response.query, response_cid);

        Ok((
            Attestation {
                request: response.query,
                response: response_cid,
                signature,
            },
            sealed,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemipfs_core::cid as cids;

    fn sample_response() -> Response {
        let resource = cids::sum(b"canonical request");
        Response::from_transcript(resource, b"transcript bytes".to_vec())
    }

    #[test]
    fn test_attest_and_verify() {
        let attester = Attester::new(IdentityKey::generate_ed25519());
        let response = sample_response();

        let (attestation, sealed) = attester.attest(&response).unwrap();

        assert_eq!(attestation.request, response.query);
        assert_eq!(attestation.response, cids::sum(&sealed));
        assert!(attestation.verify(&attester.public()));
    }

    #[test]
    fn test_flipped_signature_bit_fails() {
        let attester = Attester::new(IdentityKey::generate_ed25519());
        let (mut attestation, _) = attester.attest(&sample_response()).unwrap();

        attestation.signature[0] ^= 0x01;
        assert!(!attestation.verify(&attester.public()));
    }

    #[test]
    fn test_wrong_relay_key_fails() {
        let attester = Attester::new(IdentityKey::generate_ed25519());
        let other = IdentityKey::generate_ed25519();
        let (attestation, _) = attester.attest(&sample_response()).unwrap();

        assert!(!attestation.verify(&other.public()));
    }

    #[test]
    fn test_rebound_response_fails() {
        let attester = Attester::new(IdentityKey::generate_ed25519());
        let (mut attestation, _) = attester.attest(&sample_response()).unwrap();

        // Pointing the attestation at different sealed bytes breaks it.
        attestation.response = cids::sum(b"some other sealed blob");
        assert!(!attestation.verify(&attester.public()));
    }

    #[test]
    fn test_encoding_roundtrip() {
        let attester = Attester::new(IdentityKey::generate_ed25519());
        let (attestation, _) = attester.attest(&sample_response()).unwrap();

        let bytes = attestation.to_bytes().unwrap();
        let decoded = Attestation::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, attestation);
        assert!(decoded.verify(&attester.public()));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(Attestation::from_bytes(&[0xDE, 0xAD, 0xBE]).is_err());
    }
}
