//! Threading Resolver (spec.md §4.5).
//!
//! Walks a foreign reply's unmapped ancestor chain, bridges it oldest
//! first via the same pipeline entry point every inbound item goes
//! through, then retries the original lookup. Bounded by chain length —
//! one thread-fetch per unresolved id, no second recursive attempt.

use crate::error::Result;
use crate::store::Store;

/// One ancestor as returned by a foreign network's thread-fetch
/// primitive, deepest-first (closest to the leaf first).
pub struct AncestorNode {
    pub foreign_id: String,
    pub raw: serde_json::Value,
}

/// Foreign-network operation the resolver needs but doesn't implement:
/// given a foreign id, return its ancestor chain deepest-first.
#[async_trait::async_trait]
pub trait ThreadFetch: Send + Sync {
    async fn fetch_ancestors(&self, foreign_id: &str) -> Result<Vec<AncestorNode>>;
}

/// Result of resolving one reply's ancestor chain.
pub enum ResolutionOutcome {
    /// The direct parent is now mapped; publish threaded as normal.
    Resolved { nostr_parent_id: String, nostr_root_id: Option<String> },
    /// Still unresolved after the walk — caller falls back per spec.md §4.6.
    Unresolved,
}

/// Resolve `unmapped_parent_id` by fetching and bridging its ancestor
/// chain via `bridge_one`, then retrying the lookup. `bridge_one` is the
/// same bridge-post entry point every inbound item goes through, so an
/// already-mapped ancestor is a no-op at its own step 0.
pub async fn resolve<F, Fut>(
    fetcher: &dyn ThreadFetch,
    store: &dyn Store,
    unmapped_parent_id: &str,
    mut bridge_one: F,
) -> Result<ResolutionOutcome>
where
    F: FnMut(AncestorNode) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let chain = fetcher.fetch_ancestors(unmapped_parent_id).await?;

    // Deepest-first as returned, so the last element is the thread root.
    let root_foreign_id = chain.last().map(|n| n.foreign_id.clone());

    let mut oldest_first = chain;
    oldest_first.reverse();

    for node in oldest_first {
        bridge_one(node).await?;
    }

    match store.get_nostr_for(unmapped_parent_id).await? {
        Some(nostr_parent_id) => {
            let nostr_root_id = match root_foreign_id {
                Some(root_id) if root_id != unmapped_parent_id => {
                    store.get_nostr_for(&root_id).await?
                }
                _ => None,
            };
            Ok(ResolutionOutcome::Resolved { nostr_parent_id, nostr_root_id })
        }
        None => Ok(ResolutionOutcome::Unresolved),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeFetch {
        chain: Vec<AncestorNode>,
    }

    #[async_trait::async_trait]
    impl ThreadFetch for FakeFetch {
        async fn fetch_ancestors(&self, _foreign_id: &str) -> Result<Vec<AncestorNode>> {
            Ok(self
                .chain
                .iter()
                .map(|n| AncestorNode { foreign_id: n.foreign_id.clone(), raw: n.raw.clone() })
                .collect())
        }
    }

    #[tokio::test]
    async fn scenario_3_three_ancestor_chain_resolves_oldest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        // deepest-first as the foreign API would return it: leaf P1, mid P2, root P3.
        let fetcher = FakeFetch {
            chain: vec![
                AncestorNode { foreign_id: "P1".to_string(), raw: serde_json::json!({}) },
                AncestorNode { foreign_id: "P2".to_string(), raw: serde_json::json!({}) },
                AncestorNode { foreign_id: "P3".to_string(), raw: serde_json::json!({}) },
            ],
        };

        let call_count = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let order_clone = order.clone();
        let call_count_clone = call_count.clone();

        let outcome = resolve(&fetcher, &store, "P1", |node| {
            let store = &store;
            let order = order_clone.clone();
            let call_count = call_count_clone.clone();
            async move {
                call_count.fetch_add(1, Ordering::SeqCst);
                order.lock().unwrap().push(node.foreign_id.clone());
                let synthetic_nostr_id = format!("E_{}", node.foreign_id);
                store.put_mapping(&node.foreign_id, &synthetic_nostr_id).await
            }
        })
        .await
        .unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["P3", "P2", "P1"]);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
        match outcome {
            ResolutionOutcome::Resolved { nostr_parent_id, nostr_root_id } => {
                assert_eq!(nostr_parent_id, "E_P1");
                assert_eq!(nostr_root_id, Some("E_P3".to_string()));
            }
            ResolutionOutcome::Unresolved => panic!("expected resolution"),
        }
    }

    #[tokio::test]
    async fn unresolved_when_fetch_returns_empty_chain() {
        let store = SqliteStore::open_in_memory().unwrap();
        let fetcher = FakeFetch { chain: vec![] };
        let outcome = resolve(&fetcher, &store, "P1", |_| async { Ok(()) }).await.unwrap();
        assert!(matches!(outcome, ResolutionOutcome::Unresolved));
    }
}
