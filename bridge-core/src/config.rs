//! Configuration consumed by the core (spec.md §6).
//!
//! Mirrors the teacher's per-concern sub-struct layout (`RelayConfig`,
//! `CacheConfig`, ...), each with a sensible `Default`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Full configuration for the bridge core.
#[derive(Clone)]
pub struct BridgeConfig {
    pub relay: RelayConfig,
    pub poll: PollConfig,
    pub identity: IdentityConfig,
    /// Runtime-togglable: append source permalinks to bridged content.
    /// An atomic flag rather than a locked field — spec.md §9 calls out
    /// that read frequency is high and staleness for one poll cycle is
    /// harmless.
    pub show_source_link: Arc<AtomicBool>,
    /// Whether AT Protocol / ActivityPub *timelines* (not just
    /// notifications) are bridged.
    pub timeline_bridging_enabled: Arc<AtomicBool>,
}

impl BridgeConfig {
    pub fn show_source_link(&self) -> bool {
        self.show_source_link.load(Ordering::Relaxed)
    }

    pub fn set_show_source_link(&self, enabled: bool) {
        self.show_source_link.store(enabled, Ordering::Relaxed);
    }

    pub fn timeline_bridging_enabled(&self) -> bool {
        self.timeline_bridging_enabled.load(Ordering::Relaxed)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            poll: PollConfig::default(),
            identity: IdentityConfig::default(),
            show_source_link: Arc::new(AtomicBool::new(true)),
            timeline_bridging_enabled: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Relay set the bridge publishes translated events to.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub relays: Vec<String>,
    pub publish_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            relays: vec!["wss://relay.damus.io".to_string(), "wss://nos.lol".to_string()],
            publish_timeout: Duration::from_secs(10),
        }
    }
}

/// Polling scheduler tuning (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub fetch_limit: usize,
    pub foreign_call_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            fetch_limit: 50,
            foreign_call_timeout: Duration::from_secs(15),
        }
    }
}

/// Local identity and identity-derivation settings (spec.md §4.2, §6).
#[derive(Clone, Default)]
pub struct IdentityConfig {
    /// Bridge-wide secret used as the HMAC key for derived identities.
    pub bridge_secret: Vec<u8>,
    /// Local user's Nostr public key (hex).
    pub local_pubkey: String,
    /// Local user's ActivityPub actor URL.
    pub local_actor_url: String,
    /// Local domain, used for NIP-05 synthesis.
    pub local_domain: String,
}

/// Build the NIP-05 identifier for a local-part and domain, e.g.
/// `nip05_identifier("_", "bridge.example") == "_@bridge.example"`.
/// Serving the resulting `.well-known/nostr.json` document is the
/// outbound HTTP server's job (spec.md §1); this is the pure mapping
/// function it is built on.
pub fn nip05_identifier(local_part: &str, domain: &str) -> String {
    format!("{local_part}@{domain}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nip05_identifier_formats() {
        assert_eq!(nip05_identifier("_", "bridge.example"), "_@bridge.example");
        assert_eq!(nip05_identifier("alice", "bridge.example"), "alice@bridge.example");
    }

    #[test]
    fn show_source_link_toggle_is_atomic() {
        let config = BridgeConfig::default();
        assert!(config.show_source_link());
        config.set_show_source_link(false);
        assert!(!config.show_source_link());
    }
}
