//! The canonical data model: the Normalized Post intermediate representation
//! and the other records the bridge persists.

use serde::{Deserialize, Serialize};

/// Which foreign network a proxy id / mapping belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForeignProtocol {
    ActivityPub,
    AtProto,
}

impl ForeignProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForeignProtocol::ActivityPub => "activitypub",
            ForeignProtocol::AtProto => "atproto",
        }
    }

    /// Whether `id` carries this protocol's prefix discriminator (spec.md §3/§6).
    pub fn id_has_prefix(&self, id: &str) -> bool {
        match self {
            ForeignProtocol::ActivityPub => id.starts_with("http"),
            ForeignProtocol::AtProto => id.starts_with("at://") || id.starts_with("bsky:"),
        }
    }
}

impl std::fmt::Display for ForeignProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An image attached to a post, in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub url: String,
    pub alt: String,
    pub mime: String,
    pub blurhash: String,
    pub width: u32,
    pub height: u32,
}

/// Protocol-agnostic normalized post — the intermediate representation
/// every foreign parser produces and the Builder consumes.
///
/// See spec.md §3 for field-by-field constraints; the most important
/// invariant is that this type never carries a signature — signing is a
/// separate step bound to the identity-derivation contract.
#[derive(Debug, Clone, Default)]
pub struct NormalizedPost {
    pub content: String,
    pub created_at: i64,
    pub images: Vec<ImageDescriptor>,
    pub reply_to_event_id: String,
    pub root_event_id: String,
    pub relay_hint: Option<String>,
    pub mention_pubkeys: Vec<String>,
    pub quote_event_id: String,
    pub hashtags: Vec<String>,
    pub content_warning: String,
    pub source_url: String,
    pub show_source_link: bool,
    pub proxy_id: String,
    pub proxy_protocol: Option<ForeignProtocol>,
}

impl NormalizedPost {
    /// Whether this post is a reply (has a direct parent).
    pub fn is_reply(&self) -> bool {
        !self.reply_to_event_id.is_empty()
    }

    /// Whether root and direct parent are the same event (or root unset) —
    /// the "single-parent" case from spec.md §3.
    pub fn is_single_parent(&self) -> bool {
        self.root_event_id.is_empty() || self.root_event_id == self.reply_to_event_id
    }
}

/// A persisted (foreign_id, nostr_event_id) mapping — the idempotency
/// substrate for the whole bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub foreign_id: String,
    pub nostr_id: String,
}

/// A follow relationship. `follower_id` carries its own type discriminator
/// in its prefix (`http…` for ActivityPub actor URLs, `bsky:<DID>` for
/// AT Protocol accounts) per spec.md §3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowEdge {
    pub follower_id: String,
    pub followed_id: String,
}

/// A derived pseudonymous identity binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedIdentity {
    pub derived_pubkey: String,
    pub foreign_actor_id: String,
}

/// Aggregate counts partitioned by foreign-id prefix, for operator stats.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingStats {
    pub activitypub_count: u64,
    pub atproto_count: u64,
    pub other_count: u64,
}

/// The reason an inbound foreign notification was raised, per spec.md §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationReason {
    Follow,
    Like,
    Repost,
    Reply,
    Mention,
    Quote,
    Other,
}
