//! Admin identity persistence and the scannable pairing code.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use qrcode::QrCode;
use qrcode::render::{svg, unicode};
use tracing::info;

use printlink_protocol::Identity;
use printlink_store::{KeyValueStore, StoreError, keys};

#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("QR encoding failed: {0}")]
    Qr(#[from] qrcode::types::QrError),
}

/// Returns the admin's persisted identity, generating and storing one on
/// first use.
pub fn load_or_create_identity(store: &dyn KeyValueStore) -> Result<Identity, StoreError> {
    if let Some(id) = store.get(keys::ADMIN_IDENTITY).filter(|id| !id.trim().is_empty()) {
        return Ok(Identity::new(id));
    }
    let identity = Identity::generate_admin();
    store.set(keys::ADMIN_IDENTITY, identity.as_str())?;
    info!(identity = %identity, "Generated admin identity");
    Ok(identity)
}

/// QR code carrying an admin identity, scanned by customers to connect.
pub struct PairingCode {
    identity: Identity,
    code: QrCode,
}

impl PairingCode {
    pub fn new(identity: Identity) -> Result<Self, PairingError> {
        let code = QrCode::new(identity.as_str().as_bytes())?;
        Ok(Self { identity, code })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn to_svg(&self) -> String {
        self.code
            .render::<svg::Color>()
            .min_dimensions(200, 200)
            .build()
    }

    /// `data:` URL of the SVG rendering, for embedding in an `<img>`.
    pub fn to_data_url(&self) -> String {
        format!("data:image/svg+xml;base64,{}", STANDARD.encode(self.to_svg()))
    }

    /// Terminal rendering using half-block characters.
    pub fn to_unicode(&self) -> String {
        self.code
            .render::<unicode::Dense1x2>()
            .dark_color(unicode::Dense1x2::Light)
            .light_color(unicode::Dense1x2::Dark)
            .build()
    }
}

impl std::fmt::Debug for PairingCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingCode")
            .field("identity", &self.identity)
            .field("width", &self.code.width())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use printlink_store::{JsonFileStore, MemoryStore};

    use super::*;

    #[test]
    fn identity_generated_once() {
        let store = MemoryStore::new();
        let first = load_or_create_identity(&store).unwrap();
        assert!(first.as_str().starts_with("ADMIN-"));
        assert_eq!(first.short_code().len(), 6);

        let second = load_or_create_identity(&store).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn identity_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let first = {
            let store = JsonFileStore::open(path.clone()).unwrap();
            load_or_create_identity(&store).unwrap()
        };
        let store = JsonFileStore::open(path).unwrap();
        assert_eq!(load_or_create_identity(&store).unwrap(), first);
    }

    #[test]
    fn renders_all_formats() {
        let code = PairingCode::new(Identity::new("ADMIN-AB12CD")).unwrap();
        assert!(code.to_svg().contains("<svg"));

        let url = code.to_data_url();
        let encoded = url.strip_prefix("data:image/svg+xml;base64,").unwrap();
        let decoded = STANDARD.decode(encoded).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), code.to_svg());

        let text = code.to_unicode();
        assert!(text.lines().count() > 5);
    }
}
