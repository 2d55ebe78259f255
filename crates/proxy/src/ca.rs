//! Interception CA material.
//!
//! The TLS-terminating edge in front of the proxy needs a root it can mint
//! leaf certificates from. We keep a self-signed ECDSA P-256 CA next to the
//! proxy (`cert.pem` + `priv.pem`), valid for a month, generating it on
//! first start. TLS interception itself lives outside this crate.

use std::path::Path;

use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, PKCS_ECDSA_P256_SHA256,
};
use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::{ProxyError, Result};

/// CA validity window.
const CA_VALIDITY: Duration = Duration::days(30);

/// PEM-encoded CA certificate and private key.
#[derive(Debug, Clone)]
pub struct CaMaterial {
    /// Certificate PEM (`cert.pem`).
    pub cert_pem: String,
    /// Private key PEM (`priv.pem`).
    pub key_pem: String,
}

/// Load the CA pair from `dir`, generating and persisting one when missing.
pub fn load_or_create_ca(dir: &Path) -> Result<CaMaterial> {
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("priv.pem");

    if cert_path.exists() && key_path.exists() {
        return Ok(CaMaterial {
            cert_pem: std::fs::read_to_string(&cert_path)?,
            key_pem: std::fs::read_to_string(&key_path)?,
        });
    }

    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| ProxyError::Ca(e.to_string()))?;

    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::OrganizationName, "gemipfs");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    params.not_before = OffsetDateTime::now_utc();
    params.not_after = params.not_before + CA_VALIDITY;

    let cert = params
        .self_signed(&key)
        .map_err(|e| ProxyError::Ca(e.to_string()))?;

    let material = CaMaterial {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    };

    std::fs::create_dir_all(dir)?;
    std::fs::write(&cert_path, &material.cert_pem)?;
    std::fs::write(&key_path, &material.key_pem)?;
    info!("Generated interception CA at {:?}", cert_path);

    Ok(material)
}
