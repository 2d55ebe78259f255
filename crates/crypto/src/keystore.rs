//! Identity persistence.

use std::path::Path;

use tracing::info;

use crate::keys::IdentityKey;
use crate::Result;

/// Load an identity from `path`, generating and saving a fresh Ed25519 key
/// when the file does not exist yet.
pub fn load_or_generate_identity(path: &Path) -> Result<IdentityKey> {
    if path.exists() {
        let bytes = std::fs::read(path)?;
        return IdentityKey::from_bytes(&bytes);
    }

    let identity = IdentityKey::generate_ed25519();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, identity.to_bytes()?)?;
    info!("Generated new identity at {:?}", path);
    Ok(identity)
}
