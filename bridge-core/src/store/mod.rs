//! Persistence Store (spec.md §4.1): durable mapping of foreign-object
//! identifiers ↔ Nostr event IDs, follow edges, derived-identity
//! bindings, and resume-cursor K/V — the idempotency substrate for the
//! whole bridge.

mod cache;
mod sqlite;

pub use cache::MappingCache;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DerivedIdentity, FollowEdge, ForeignProtocol, MappingStats};

/// Capability surface the rest of the core depends on. A trait so the
/// pipeline and threading resolver can be tested against an in-memory
/// double without touching disk.
#[async_trait]
pub trait Store: Send + Sync {
    // --- Mappings ---

    /// Idempotent insert-or-ignore. A duplicate key is not an error —
    /// per spec.md §4.1 it signals a prior successful publish.
    async fn put_mapping(&self, foreign_id: &str, nostr_id: &str) -> Result<()>;
    async fn get_nostr_for(&self, foreign_id: &str) -> Result<Option<String>>;
    async fn get_foreign_for(&self, nostr_id: &str) -> Result<Option<String>>;
    async fn delete_mapping(&self, foreign_id: &str, nostr_id: &str) -> Result<()>;

    // --- Follows ---

    async fn add_follow(&self, follower_id: &str, followed_id: &str) -> Result<()>;
    async fn remove_follow(&self, follower_id: &str, followed_id: &str) -> Result<()>;
    async fn list_by_followed(&self, followed_id: &str) -> Result<Vec<FollowEdge>>;
    async fn list_by_follower(&self, follower_id: &str) -> Result<Vec<FollowEdge>>;

    /// `list_by_followed`, narrowed to edges whose follower id belongs to
    /// `protocol` (spec.md §4.1's "type-filtered variants" requirement).
    async fn list_by_followed_filtered(
        &self,
        followed_id: &str,
        protocol: ForeignProtocol,
    ) -> Result<Vec<FollowEdge>> {
        let edges = self.list_by_followed(followed_id).await?;
        Ok(edges.into_iter().filter(|e| protocol.id_has_prefix(&e.follower_id)).collect())
    }

    /// `list_by_follower`, narrowed to edges whose followed id belongs to
    /// `protocol`.
    async fn list_by_follower_filtered(
        &self,
        follower_id: &str,
        protocol: ForeignProtocol,
    ) -> Result<Vec<FollowEdge>> {
        let edges = self.list_by_follower(follower_id).await?;
        Ok(edges.into_iter().filter(|e| protocol.id_has_prefix(&e.followed_id)).collect())
    }

    // --- Derived identities ---

    async fn store_derived_identity(&self, pubkey: &str, foreign_actor_id: &str) -> Result<()>;
    async fn lookup_actor_by_pubkey(&self, pubkey: &str) -> Result<Option<String>>;
    async fn list_derived_identities(&self) -> Result<Vec<DerivedIdentity>>;

    // --- K/V (resume cursors, operator stats) ---

    async fn kv_get(&self, key: &str) -> Result<Option<String>>;
    async fn kv_set(&self, key: &str, value: &str) -> Result<()>;

    // --- Stats ---

    async fn mapping_stats(&self) -> Result<MappingStats>;

    // --- Audit log ---

    async fn record_audit(&self, action: &str, detail: &str) -> Result<()>;
}
