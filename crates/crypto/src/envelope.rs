//! Hybrid query envelope.
//!
//! The proxy seals `encode(request) || encode(repo)` toward the relay's
//! identity key. Ed25519 recipients are mapped to X25519 and sealed with an
//! ephemeral ECDH; RSA recipients get an OAEP-wrapped file key. The payload
//! itself is ChaCha20-Poly1305 in both schemes.
//!
//! Envelope layout:
//!   `0x01 || ephemeral_pub(32) || nonce(12) || ciphertext`   (Ed25519)
//!   `0x02 || klen(u16 BE) || wrapped_key || nonce(12) || ciphertext` (RSA)

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::Oaep;
use sha2::{Digest, Sha256};
use url::Url;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use gemipfs_core::{DecodedQuery, Request, WireQuery};

use crate::keys::{IdentityKey, PublicIdentity};
use crate::{CryptoError, Result};

const SCHEME_X25519: u8 = 0x01;
const SCHEME_RSA: u8 = 0x02;

const NONCE_LEN: usize = 12;

/// Seal a decoded query toward a recipient identity.
///
/// Returns the wire query: the derived resource CID plus the envelope. The
/// plaintext fingerprint never leaves this function.
pub fn encrypt_query(query: &DecodedQuery, recipient: &PublicIdentity) -> Result<WireQuery> {
    let mut payload = bincode::serialize(&query.request.serialize())
        .map_err(|e| CryptoError::BadEncoding(e.to_string()))?;
    let repo = bincode::serialize(&query.repo.to_string())
        .map_err(|e| CryptoError::BadEncoding(e.to_string()))?;
    payload.extend_from_slice(&repo);

    let envelope = seal_payload(&payload, recipient)?;

    Ok(WireQuery {
        resource: WireQuery::wire_cid(&query.resource),
        envelope,
    })
}

/// Open a wire query with the local identity.
///
/// The resource CID of the result is recomputed from the canonical request;
/// the wire CID is never trusted as a fingerprint.
pub fn decrypt_query(wire: &WireQuery, identity: &IdentityKey) -> Result<DecodedQuery> {
    let payload = open_payload(&wire.envelope, identity)?;

    let mut cursor = std::io::Cursor::new(&payload);
    let request_bytes: Vec<u8> = bincode::deserialize_from(&mut cursor)
        .map_err(|e| CryptoError::BadEncoding(format!("query request: {}", e)))?;
    let repo_str: String = bincode::deserialize_from(&mut cursor)
        .map_err(|e| CryptoError::BadEncoding(format!("query repo: {}", e)))?;

    let request = Request::parse(&request_bytes)?.canonicalize();
    let repo = Url::parse(&repo_str)
        .map_err(|e| CryptoError::BadEncoding(format!("query repo url: {}", e)))?;

    Ok(DecodedQuery::new(request, repo))
}

fn seal_payload(payload: &[u8], recipient: &PublicIdentity) -> Result<Vec<u8>> {
    match recipient {
        PublicIdentity::Ed25519(vk) => {
            let ephemeral = StaticSecret::random_from_rng(OsRng);
            let ephemeral_pub = X25519Public::from(&ephemeral);

            // Map the Ed25519 point to its X25519 form for the exchange.
            let recipient_x = X25519Public::from(vk.to_montgomery().to_bytes());
            let shared = ephemeral.diffie_hellman(&recipient_x);
            let key: [u8; 32] = Sha256::digest(shared.as_bytes()).into();

            let (nonce, ciphertext) = seal_symmetric(&key, payload)?;

            let mut out = Vec::with_capacity(1 + 32 + NONCE_LEN + ciphertext.len());
            out.push(SCHEME_X25519);
            out.extend_from_slice(ephemeral_pub.as_bytes());
            out.extend_from_slice(&nonce);
            out.extend_from_slice(&ciphertext);
            Ok(out)
        }
        PublicIdentity::Rsa(pk) => {
            let mut file_key = [0u8; 32];
            OsRng.fill_bytes(&mut file_key);
            let wrapped = pk
                .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &file_key)
                .map_err(|_| CryptoError::BadEnvelope)?;

            let (nonce, ciphertext) = seal_symmetric(&file_key, payload)?;

            let mut out = Vec::with_capacity(3 + wrapped.len() + NONCE_LEN + ciphertext.len());
            out.push(SCHEME_RSA);
            out.extend_from_slice(&(wrapped.len() as u16).to_be_bytes());
            out.extend_from_slice(&wrapped);
            out.extend_from_slice(&nonce);
            out.extend_from_slice(&ciphertext);
            Ok(out)
        }
    }
}

fn open_payload(envelope: &[u8], identity: &IdentityKey) -> Result<Vec<u8>> {
    let (&scheme, rest) = envelope.split_first().ok_or(CryptoError::BadEnvelope)?;
    match (scheme, identity) {
        (SCHEME_X25519, IdentityKey::Ed25519(sk)) => {
            if rest.len() < 32 + NONCE_LEN {
                return Err(CryptoError::BadEnvelope);
            }
            let ephemeral_pub: [u8; 32] = rest[..32].try_into().expect("checked length");
            let shared = x25519_dalek::x25519(sk.to_scalar_bytes(), ephemeral_pub);
            let key: [u8; 32] = Sha256::digest(shared).into();
            open_symmetric(&key, &rest[32..])
        }
        (SCHEME_RSA, IdentityKey::Rsa(sk)) => {
            if rest.len() < 2 {
                return Err(CryptoError::BadEnvelope);
            }
            let klen = u16::from_be_bytes([rest[0], rest[1]]) as usize;
            let rest = &rest[2..];
            if rest.len() < klen + NONCE_LEN {
                return Err(CryptoError::BadEnvelope);
            }
            let file_key = sk
                .decrypt(Oaep::new::<Sha256>(), &rest[..klen])
                .map_err(|_| CryptoError::BadEnvelope)?;
            let file_key: [u8; 32] = file_key
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::BadEnvelope)?;
            open_symmetric(&file_key, &rest[klen..])
        }
        _ => Err(CryptoError::BadEnvelope),
    }
}

fn seal_symmetric(key: &[u8; 32], payload: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::BadEnvelope)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), payload)
        .map_err(|_| CryptoError::BadEnvelope)?;
    Ok((nonce, ciphertext))
}

fn open_symmetric(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN {
        return Err(CryptoError::BadEnvelope);
    }
    let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::BadEnvelope)?;
    cipher
        .decrypt(Nonce::from_slice(&data[..NONCE_LEN]), &data[NONCE_LEN..])
        .map_err(|_| CryptoError::BadEnvelope)
}
