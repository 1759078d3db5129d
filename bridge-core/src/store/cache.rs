//! In-process two-way mapping cache (spec.md §4.1, design note in §9).
//!
//! Concurrent reads never block each other and concurrent writes to the
//! same key are safe — both directions are `dashmap::DashMap`, which
//! shards its internal locking per-bucket. Delete is the one operation
//! that must touch both directions atomically (spec.md §9: "compare-and-
//! evict both directions inside the delete operation"), so it alone goes
//! through a narrow mutex that only serializes deletes against each other,
//! never against the lock-free reads and inserts.

use std::sync::Mutex;

use dashmap::DashMap;

#[derive(Default)]
pub struct MappingCache {
    foreign_to_nostr: DashMap<String, String>,
    nostr_to_foreign: DashMap<String, String>,
    delete_guard: Mutex<()>,
}

impl MappingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_nostr_for(&self, foreign_id: &str) -> Option<String> {
        self.foreign_to_nostr.get(foreign_id).map(|v| v.clone())
    }

    pub fn get_foreign_for(&self, nostr_id: &str) -> Option<String> {
        self.nostr_to_foreign.get(nostr_id).map(|v| v.clone())
    }

    /// Populate both directions, overwriting any existing value for either
    /// key. Safe to call redundantly for the same pair; callers that must
    /// not resurrect a value the backing store rejected should check the
    /// store's own write outcome first, not rely on this being a no-op.
    pub fn insert(&self, foreign_id: &str, nostr_id: &str) {
        self.foreign_to_nostr
            .insert(foreign_id.to_string(), nostr_id.to_string());
        self.nostr_to_foreign
            .insert(nostr_id.to_string(), foreign_id.to_string());
    }

    /// Evict both directions for a (foreign_id, nostr_id) pair atomically
    /// with respect to other deletes.
    pub fn evict(&self, foreign_id: &str, nostr_id: &str) {
        let _guard = self.delete_guard.lock().unwrap();
        self.foreign_to_nostr.remove(foreign_id);
        self.nostr_to_foreign.remove(nostr_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup_both_directions() {
        let cache = MappingCache::new();
        cache.insert("at://did:plc:a/app.bsky.feed.post/1", "eid1");
        assert_eq!(
            cache.get_nostr_for("at://did:plc:a/app.bsky.feed.post/1"),
            Some("eid1".to_string())
        );
        assert_eq!(
            cache.get_foreign_for("eid1"),
            Some("at://did:plc:a/app.bsky.feed.post/1".to_string())
        );
    }

    #[test]
    fn evict_removes_both_directions() {
        let cache = MappingCache::new();
        cache.insert("foreign-1", "eid1");
        cache.evict("foreign-1", "eid1");
        assert_eq!(cache.get_nostr_for("foreign-1"), None);
        assert_eq!(cache.get_foreign_for("eid1"), None);
    }
}
