//! The bridge-post entry point (spec.md §2, §4.5): every inbound
//! foreign item — whether from a poll cycle or the Threading Resolver's
//! recursive re-entry — passes through here. Step 0 is always the
//! idempotency check, which is what makes recursive re-entry safe and
//! terminating.

use nostr::Event;
use tracing::warn;

use crate::builder;
use crate::error::Result;
use crate::identity::Signer;
use crate::relay::RelayPublisher;
use crate::store::Store;
use crate::types::NormalizedPost;

/// Bridge one already-parsed Normalized Post. Returns `Ok(None)` without
/// side effects if `proxy_id` is already mapped (duplicate / already
/// bridged — spec.md §7 taxonomy item 1, not an error).
pub async fn bridge_post(
    post: &NormalizedPost,
    store: &dyn Store,
    signer: &Signer,
    publisher: &dyn RelayPublisher,
) -> Result<Option<Event>> {
    if store.get_nostr_for(&post.proxy_id).await?.is_some() {
        return Ok(None);
    }

    let event_builder = builder::build_text_note(post);
    let event = signer
        .sign_as_derived(event_builder, &post.proxy_id, store)
        .await?;

    match publisher.publish(&event).await {
        Ok(()) => {
            store.put_mapping(&post.proxy_id, &event.id.to_hex()).await?;
            Ok(Some(event))
        }
        Err(e) => {
            // Publish failure: mapping is NOT inserted so the next cycle retries (spec.md §7).
            warn!(error = %e, foreign_id = %post.proxy_id, "relay publish failed, not recording mapping");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::types::ForeignProtocol;
    use nostr::Keys;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakePublisher {
        fail: AtomicBool,
    }

    #[async_trait::async_trait]
    impl RelayPublisher for FakePublisher {
        async fn publish(&self, _event: &Event) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                Err(crate::error::BridgeError::Publish("relay rejected".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn test_post(proxy_id: &str) -> NormalizedPost {
        NormalizedPost {
            content: "hello".to_string(),
            proxy_id: proxy_id.to_string(),
            proxy_protocol: Some(ForeignProtocol::AtProto),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn already_mapped_is_skipped_without_republishing() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put_mapping("at://x", "EID1").await.unwrap();
        let signer = Signer::new(Keys::generate(), b"secret".to_vec());
        let publisher = FakePublisher { fail: AtomicBool::new(true) };

        let result = bridge_post(&test_post("at://x"), &store, &signer, &publisher).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn successful_publish_records_mapping() {
        let store = SqliteStore::open_in_memory().unwrap();
        let signer = Signer::new(Keys::generate(), b"secret".to_vec());
        let publisher = FakePublisher { fail: AtomicBool::new(false) };

        let event = bridge_post(&test_post("at://y"), &store, &signer, &publisher)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.get_nostr_for("at://y").await.unwrap(), Some(event.id.to_hex()));
    }

    #[tokio::test]
    async fn failed_publish_does_not_record_mapping() {
        let store = SqliteStore::open_in_memory().unwrap();
        let signer = Signer::new(Keys::generate(), b"secret".to_vec());
        let publisher = FakePublisher { fail: AtomicBool::new(true) };

        let result = bridge_post(&test_post("at://z"), &store, &signer, &publisher).await;
        assert!(result.is_err());
        assert_eq!(store.get_nostr_for("at://z").await.unwrap(), None);
    }
}
