//! Identity keys.
//!
//! Peers identify themselves with either Ed25519 or RSA keys. Both kinds are
//! modeled as one tagged variant with a single sign/verify and wrap/unwrap
//! contract per kind; everything else (ECDSA, secp256k1, hashed peer ids)
//! surfaces `UnsupportedKey` instead of partially working.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use libp2p_identity::PeerId;
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::{CryptoError, Result};

const TAG_ED25519: u8 = 0x01;
const TAG_RSA: u8 = 0x02;

/// A node's private identity.
pub enum IdentityKey {
    /// Ed25519 signing key (the common case).
    Ed25519(SigningKey),
    /// RSA private key.
    Rsa(Box<RsaPrivateKey>),
}

/// A peer's public identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicIdentity {
    /// Ed25519 verifying key.
    Ed25519(VerifyingKey),
    /// RSA public key.
    Rsa(RsaPublicKey),
}

impl IdentityKey {
    /// Generate a fresh Ed25519 identity.
    pub fn generate_ed25519() -> Self {
        Self::Ed25519(SigningKey::generate(&mut OsRng))
    }

    /// The matching public identity.
    pub fn public(&self) -> PublicIdentity {
        match self {
            Self::Ed25519(sk) => PublicIdentity::Ed25519(sk.verifying_key()),
            Self::Rsa(sk) => PublicIdentity::Rsa(sk.to_public_key()),
        }
    }

    /// Sign `data` with this identity.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Ed25519(sk) => Ok(sk.sign(data).to_bytes().to_vec()),
            Self::Rsa(sk) => {
                let digest = Sha256::digest(data);
                sk.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
                    .map_err(|e| CryptoError::SigningFailed(e.to_string()))
            }
        }
    }

    /// Serialize for the keystore: a kind tag plus the key material.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Ed25519(sk) => {
                let mut out = vec![TAG_ED25519];
                out.extend_from_slice(&sk.to_bytes());
                Ok(out)
            }
            Self::Rsa(sk) => {
                let der = sk
                    .to_pkcs1_der()
                    .map_err(|e| CryptoError::BadEncoding(e.to_string()))?;
                let mut out = vec![TAG_RSA];
                out.extend_from_slice(der.as_bytes());
                Ok(out)
            }
        }
    }

    /// Parse keystore bytes back into an identity.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        match data.split_first() {
            Some((&TAG_ED25519, rest)) => {
                let seed: [u8; 32] = rest
                    .try_into()
                    .map_err(|_| CryptoError::BadEncoding("ed25519 seed length".into()))?;
                Ok(Self::Ed25519(SigningKey::from_bytes(&seed)))
            }
            Some((&TAG_RSA, rest)) => {
                let sk = RsaPrivateKey::from_pkcs1_der(rest)
                    .map_err(|e| CryptoError::BadEncoding(e.to_string()))?;
                Ok(Self::Rsa(Box::new(sk)))
            }
            Some((tag, _)) => Err(CryptoError::UnsupportedKey(format!("key tag {:#04x}", tag))),
            None => Err(CryptoError::BadEncoding("empty identity key".into())),
        }
    }
}

impl PublicIdentity {
    /// Verify `signature` over `data`.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        match self {
            Self::Ed25519(vk) => {
                let Ok(sig) = ed25519_dalek::Signature::from_slice(signature) else {
                    return false;
                };
                vk.verify(data, &sig).is_ok()
            }
            Self::Rsa(pk) => {
                let digest = Sha256::digest(data);
                pk.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
                    .is_ok()
            }
        }
    }

    /// The libp2p-style peer id for this identity.
    ///
    /// Only Ed25519 identities have inline (extractable) peer ids; RSA peers
    /// exchange their key material explicitly instead.
    pub fn peer_id(&self) -> Result<PeerId> {
        match self {
            Self::Ed25519(vk) => {
                let pk = libp2p_identity::ed25519::PublicKey::try_from_bytes(&vk.to_bytes())
                    .map_err(|e| CryptoError::BadEncoding(e.to_string()))?;
                Ok(PeerId::from_public_key(&libp2p_identity::PublicKey::from(
                    pk,
                )))
            }
            Self::Rsa(_) => Err(CryptoError::UnsupportedKey(
                "rsa identities have no inline peer id".into(),
            )),
        }
    }

    /// Recover the public identity embedded in an inline peer id.
    pub fn from_peer_id(peer: &PeerId) -> Result<Self> {
        let mh = cid::multihash::Multihash::<64>::from_bytes(&peer.to_bytes())
            .map_err(|e| CryptoError::BadEncoding(e.to_string()))?;
        // Only the identity multihash carries the key inline.
        if mh.code() != 0x00 {
            return Err(CryptoError::UnsupportedKey(
                "peer id is hashed, key not extractable".into(),
            ));
        }
        let pk = libp2p_identity::PublicKey::try_decode_protobuf(mh.digest())
            .map_err(|e| CryptoError::BadEncoding(e.to_string()))?;
        match pk.try_into_ed25519() {
            Ok(ed) => {
                let vk = VerifyingKey::from_bytes(&ed.to_bytes())
                    .map_err(|e| CryptoError::BadEncoding(e.to_string()))?;
                Ok(Self::Ed25519(vk))
            }
            Err(_) => Err(CryptoError::UnsupportedKey(
                "inline peer key is not ed25519".into(),
            )),
        }
    }

    /// Serialize as tag + key material (identity exchange wire form).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Ed25519(vk) => {
                let mut out = vec![TAG_ED25519];
                out.extend_from_slice(&vk.to_bytes());
                Ok(out)
            }
            Self::Rsa(pk) => {
                let der = pk
                    .to_pkcs1_der()
                    .map_err(|e| CryptoError::BadEncoding(e.to_string()))?;
                let mut out = vec![TAG_RSA];
                out.extend_from_slice(der.as_bytes());
                Ok(out)
            }
        }
    }

    /// Parse identity exchange bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        match data.split_first() {
            Some((&TAG_ED25519, rest)) => {
                let raw: [u8; 32] = rest
                    .try_into()
                    .map_err(|_| CryptoError::BadEncoding("ed25519 key length".into()))?;
                let vk = VerifyingKey::from_bytes(&raw)
                    .map_err(|e| CryptoError::BadEncoding(e.to_string()))?;
                Ok(Self::Ed25519(vk))
            }
            Some((&TAG_RSA, rest)) => {
                let pk = RsaPublicKey::from_pkcs1_der(rest)
                    .map_err(|e| CryptoError::BadEncoding(e.to_string()))?;
                Ok(Self::Rsa(pk))
            }
            Some((tag, _)) => Err(CryptoError::UnsupportedKey(format!("key tag {:#04x}", tag))),
            None => Err(CryptoError::BadEncoding("empty public identity".into())),
        }
    }
}
