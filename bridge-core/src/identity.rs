//! Identity Derivator & Signer (spec.md §4.2).
//!
//! Derived keys are a pure function of `(bridge_secret, foreign_id)` so a
//! restart regenerates the same keypair for the same foreign actor — no
//! separate key-storage problem, only a binding record in Persistence
//! (`store_derived_identity`) kept so lookups don't have to re-derive.

use hmac::{Hmac, Mac};
use nostr::{Event, EventBuilder, Keys, PublicKey, SecretKey};
use sha2::Sha256;

use crate::error::{BridgeError, Result};
use crate::store::Store;

type HmacSha256 = Hmac<Sha256>;

/// Deterministically derive a 32-byte Nostr secret key for `foreign_id`
/// under `bridge_secret`. A keyed hash (HMAC-SHA256) rather than a plain
/// hash — the bridge secret must matter, not just the public identifier.
pub fn derive_secret_key(bridge_secret: &[u8], foreign_id: &str) -> Result<SecretKey> {
    let mut mac = HmacSha256::new_from_slice(bridge_secret)
        .map_err(|e| BridgeError::InvalidSecret(e.to_string()))?;
    mac.update(foreign_id.as_bytes());
    let digest = mac.finalize().into_bytes();
    SecretKey::from_slice(&digest).map_err(BridgeError::NostrKey)
}

/// Wraps the local user's keys and the bridge secret used to derive
/// per-foreign-actor keys, and exposes the three signing operations
/// named in spec.md §4.2.
pub struct Signer {
    local_keys: Keys,
    bridge_secret: Vec<u8>,
}

impl Signer {
    pub fn new(local_keys: Keys, bridge_secret: Vec<u8>) -> Self {
        Self {
            local_keys,
            bridge_secret,
        }
    }

    pub fn local_public_key(&self) -> PublicKey {
        self.local_keys.public_key()
    }

    /// Sign with the local user's own key — used for events representing
    /// the local user's own actions as seen by a foreign network (e.g. a
    /// like on the local user's note).
    pub fn sign_as_local(&self, builder: EventBuilder) -> Result<Event> {
        builder.sign_with_keys(&self.local_keys).map_err(BridgeError::NostrEventBuilder)
    }

    /// Derive the key for `foreign_id`, sign with it, and persist the
    /// binding if this is the first time it's been used.
    pub async fn sign_as_derived(
        &self,
        builder: EventBuilder,
        foreign_id: &str,
        store: &dyn Store,
    ) -> Result<Event> {
        let secret_key = derive_secret_key(&self.bridge_secret, foreign_id)?;
        let keys = Keys::new(secret_key);
        let event = builder
            .sign_with_keys(&keys)
            .map_err(BridgeError::NostrEventBuilder)?;
        store
            .store_derived_identity(&keys.public_key().to_hex(), foreign_id)
            .await?;
        Ok(event)
    }

    /// A NIP-04-encrypted kind-4 event from the local user to the local
    /// user, used for operational notifications (spec.md §4.2, §4.6).
    pub fn create_dm_to_self(&self, message: &str) -> Result<Event> {
        let pubkey = self.local_keys.public_key();
        let encrypted = nostr::nips::nip04::encrypt(self.local_keys.secret_key(), &pubkey, message)
            .map_err(|e| BridgeError::Signing(e.to_string()))?;
        EventBuilder::new(nostr::Kind::EncryptedDirectMessage, encrypted)
            .tag(nostr::Tag::public_key(pubkey))
            .sign_with_keys(&self.local_keys)
            .map_err(BridgeError::NostrEventBuilder)
    }
}
