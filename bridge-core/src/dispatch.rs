//! Notification-dispatch table (spec.md §4.6) and the concrete
//! `ItemDispatcher` that drives it.
//!
//! Composes the pieces specified elsewhere in this crate — the Threading
//! Resolver, the Builder's kind-6/7 constructors, the Signer's local and
//! derived-identity signing, and `pipeline::bridge_post` — into the one
//! per-protocol object the Polling Scheduler actually calls. Protocol
//! differences (AT Protocol vs. ActivityPub record shapes) are isolated
//! behind `ProtocolAdapter`; everything downstream of it is shared.

use std::sync::Arc;

use serde_json::Value;

use crate::builder;
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::identity::Signer;
use crate::parsers::{activitypub, atproto};
use crate::permalink;
use crate::pipeline::bridge_post;
use crate::relay::RelayPublisher;
use crate::scheduler::{FetchedItem, ItemDispatcher, Notification};
use crate::store::Store;
use crate::threading::{self, AncestorNode, ResolutionOutcome, ThreadFetch};
use crate::types::{ForeignProtocol, NormalizedPost, NotificationReason};

/// The per-protocol parsing and addressing differences the dispatcher
/// needs but doesn't implement itself (spec.md §4.4 draws the same
/// protocol boundary as the foreign-post parsers).
#[async_trait::async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn protocol(&self) -> ForeignProtocol;

    /// Parse a raw foreign record into a Normalized Post. `foreign_id`
    /// and `author_id` are ignored by adapters whose record already
    /// carries them (ActivityPub).
    async fn parse(
        &self,
        raw: &Value,
        foreign_id: &str,
        author_id: &str,
        store: &dyn Store,
        show_source_link: bool,
    ) -> Result<NormalizedPost>;

    /// Human-facing permalink for a foreign id, for DM fallback text.
    fn permalink(&self, foreign_id: &str) -> String;

    /// The raw record's direct reply parent, read straight off the wire
    /// shape rather than through Persistence — this is what feeds the
    /// Threading Resolver when the parser itself couldn't map it.
    fn raw_parent_id(&self, raw: &Value) -> Option<String>;
}

pub struct AtProtoAdapter;

#[async_trait::async_trait]
impl ProtocolAdapter for AtProtoAdapter {
    fn protocol(&self) -> ForeignProtocol {
        ForeignProtocol::AtProto
    }

    async fn parse(
        &self,
        raw: &Value,
        foreign_id: &str,
        author_id: &str,
        store: &dyn Store,
        show_source_link: bool,
    ) -> Result<NormalizedPost> {
        atproto::parse(raw, foreign_id, author_id, store, show_source_link).await
    }

    fn permalink(&self, foreign_id: &str) -> String {
        permalink::at_uri_to_permalink(foreign_id).unwrap_or_else(|| foreign_id.to_string())
    }

    fn raw_parent_id(&self, raw: &Value) -> Option<String> {
        raw.get("reply")?.get("parent")?.get("uri")?.as_str().map(str::to_string)
    }
}

pub struct ActivityPubAdapter;

#[async_trait::async_trait]
impl ProtocolAdapter for ActivityPubAdapter {
    fn protocol(&self) -> ForeignProtocol {
        ForeignProtocol::ActivityPub
    }

    async fn parse(
        &self,
        raw: &Value,
        _foreign_id: &str,
        _author_id: &str,
        store: &dyn Store,
        show_source_link: bool,
    ) -> Result<NormalizedPost> {
        activitypub::parse(raw, store, show_source_link).await
    }

    fn permalink(&self, foreign_id: &str) -> String {
        foreign_id.to_string()
    }

    fn raw_parent_id(&self, raw: &Value) -> Option<String> {
        raw.get("inReplyTo")?.as_str().map(str::to_string)
    }
}

/// Best-effort extraction of "what was liked/reposted" from a
/// notification payload — AT Protocol notifications carry it under
/// `subject.uri` (or `reasonSubject`), ActivityPub `Like`/`Announce`
/// activities under `object`.
fn extract_notification_target(raw: &Value) -> Option<String> {
    raw.get("subject")
        .and_then(|s| s.get("uri"))
        .and_then(|u| u.as_str())
        .or_else(|| raw.get("reasonSubject").and_then(|s| s.as_str()))
        .or_else(|| raw.get("object").and_then(|o| o.as_str()))
        .or_else(|| raw.get("object").and_then(|o| o.get("id")).and_then(|i| i.as_str()))
        .map(str::to_string)
}

/// Drives the spec.md §4.6 dispatch table for one foreign protocol.
pub struct BridgeDispatcher<A: ProtocolAdapter> {
    adapter: A,
    fetcher: Box<dyn ThreadFetch>,
    store: Arc<dyn Store>,
    signer: Arc<Signer>,
    publisher: Arc<dyn RelayPublisher>,
    config: Arc<BridgeConfig>,
}

impl<A: ProtocolAdapter> BridgeDispatcher<A> {
    pub fn new(
        adapter: A,
        fetcher: Box<dyn ThreadFetch>,
        store: Arc<dyn Store>,
        signer: Arc<Signer>,
        publisher: Arc<dyn RelayPublisher>,
        config: Arc<BridgeConfig>,
    ) -> Self {
        Self { adapter, fetcher, store, signer, publisher, config }
    }

    fn local_identity_id(&self) -> String {
        if !self.config.identity.local_actor_url.is_empty() {
            self.config.identity.local_actor_url.clone()
        } else {
            self.config.identity.local_pubkey.clone()
        }
    }

    /// Run the Threading Resolver, bridging each ancestor through the
    /// same adapter/pipeline every other inbound item goes through.
    async fn resolve_thread(&self, unmapped_parent_id: &str) -> Result<ResolutionOutcome> {
        let adapter = &self.adapter;
        let store: &dyn Store = self.store.as_ref();
        let signer = self.signer.as_ref();
        let publisher = self.publisher.as_ref();
        let show_source_link = self.config.show_source_link();

        threading::resolve(self.fetcher.as_ref(), store, unmapped_parent_id, |node: AncestorNode| async move {
            let ancestor_post =
                adapter.parse(&node.raw, &node.foreign_id, "", store, show_source_link).await?;
            bridge_post(&ancestor_post, store, signer, publisher).await?;
            Ok(())
        })
        .await
    }

    async fn bridge_timeline_post(&self, raw: &Value, foreign_id: &str, author_id: &str) -> Result<()> {
        let mut post = self
            .adapter
            .parse(raw, foreign_id, author_id, self.store.as_ref(), self.config.show_source_link())
            .await?;

        if !post.is_reply() {
            if let Some(raw_parent_id) = self.adapter.raw_parent_id(raw) {
                if let ResolutionOutcome::Resolved { nostr_parent_id, nostr_root_id } =
                    self.resolve_thread(&raw_parent_id).await?
                {
                    post.reply_to_event_id = nostr_parent_id.clone();
                    post.root_event_id = nostr_root_id.unwrap_or(nostr_parent_id);
                }
                // Unresolved: bridge as a non-threaded top-level post (spec.md §4.5 step 5).
            }
        }

        bridge_post(&post, self.store.as_ref(), &self.signer, self.publisher.as_ref()).await?;
        Ok(())
    }

    async fn handle_follow(&self, n: &Notification) -> Result<()> {
        self.store.add_follow(&n.actor_id, &self.local_identity_id()).await?;
        if let Some(handle) = n.raw.get("handle").and_then(|h| h.as_str()) {
            self.store
                .kv_set(&format!("follower_handle_{}", n.actor_id), handle)
                .await?;
        }
        let dm = self.signer.create_dm_to_self(&format!("New follow from {}", n.actor_id))?;
        self.publisher.publish(&dm).await?;
        Ok(())
    }

    async fn handle_like_or_repost(&self, n: &Notification, is_repost: bool) -> Result<()> {
        // Loop guard: this exact like/repost activity is already mapped,
        // meaning it's an echo of something the outbound path produced
        // from mirroring a local reaction out — translating it again
        // would feed straight back into the outbound path (spec.md §8
        // "Loop guard").
        if self.store.get_nostr_for(&n.foreign_id).await?.is_some() {
            return Ok(());
        }

        let Some(target_foreign_id) = extract_notification_target(&n.raw) else {
            return Ok(());
        };
        let Some(target_event_id) = self.store.get_nostr_for(&target_foreign_id).await? else {
            return Ok(());
        };

        let protocol = self.adapter.protocol().as_str();
        let builder = if is_repost {
            builder::build_repost(&n.foreign_id, protocol, &target_event_id)
        } else {
            builder::build_like(&n.foreign_id, protocol, &target_event_id)
        };
        let event = self.signer.sign_as_local(builder)?;
        self.publisher.publish(&event).await?;
        self.store.put_mapping(&n.foreign_id, &event.id.to_hex()).await?;
        Ok(())
    }

    async fn handle_reply_notification(&self, n: &Notification) -> Result<()> {
        let mut post = self
            .adapter
            .parse(&n.raw, &n.foreign_id, &n.actor_id, self.store.as_ref(), self.config.show_source_link())
            .await?;

        if !post.is_reply() {
            match self.adapter.raw_parent_id(&n.raw) {
                Some(raw_parent_id) => match self.resolve_thread(&raw_parent_id).await? {
                    ResolutionOutcome::Resolved { nostr_parent_id, nostr_root_id } => {
                        post.reply_to_event_id = nostr_parent_id.clone();
                        post.root_event_id = nostr_root_id.unwrap_or(nostr_parent_id);
                    }
                    ResolutionOutcome::Unresolved => {
                        return self.send_unresolvable_reply_dm(n).await;
                    }
                },
                None => return self.send_unresolvable_reply_dm(n).await,
            }
        }

        bridge_post(&post, self.store.as_ref(), &self.signer, self.publisher.as_ref()).await?;
        Ok(())
    }

    async fn send_unresolvable_reply_dm(&self, n: &Notification) -> Result<()> {
        let permalink = self.adapter.permalink(&n.foreign_id);
        let dm = self
            .signer
            .create_dm_to_self(&format!("Unresolvable reply from {}: {}", n.actor_id, permalink))?;
        self.publisher.publish(&dm).await?;
        Ok(())
    }

    async fn handle_mention_or_quote(&self, n: &Notification) -> Result<()> {
        let permalink = self.adapter.permalink(&n.foreign_id);
        let dm = self
            .signer
            .create_dm_to_self(&format!("{:?} from {}: {}", n.reason, n.actor_id, permalink))?;
        self.publisher.publish(&dm).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl<A: ProtocolAdapter> ItemDispatcher for BridgeDispatcher<A> {
    async fn dispatch_item(&self, item: &FetchedItem) -> Result<()> {
        self.bridge_timeline_post(&item.raw, &item.foreign_id, &item.author_id).await
    }

    async fn dispatch_notification(&self, notification: &Notification) -> Result<()> {
        match notification.reason {
            NotificationReason::Follow => self.handle_follow(notification).await,
            NotificationReason::Like => self.handle_like_or_repost(notification, false).await,
            NotificationReason::Repost => self.handle_like_or_repost(notification, true).await,
            NotificationReason::Reply => self.handle_reply_notification(notification).await,
            NotificationReason::Mention | NotificationReason::Quote => {
                self.handle_mention_or_quote(notification).await
            }
            NotificationReason::Other => Ok(()),
        }
    }

    async fn publish_profile_if_new(&self, _author_id: &str) -> Result<()> {
        // Publishing a kind-0 needs the foreign profile fetch (an
        // excluded HTTP collaborator per spec.md §1); this is the hook
        // point for it once that client exists.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use nostr::{Keys, Kind};
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingPublisher {
        events: Mutex<Vec<nostr::Event>>,
    }

    impl RecordingPublisher {
        fn new() -> Self {
            Self { events: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait::async_trait]
    impl RelayPublisher for RecordingPublisher {
        async fn publish(&self, event: &nostr::Event) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct EmptyFetch;

    #[async_trait::async_trait]
    impl ThreadFetch for EmptyFetch {
        async fn fetch_ancestors(&self, _foreign_id: &str) -> Result<Vec<AncestorNode>> {
            Ok(Vec::new())
        }
    }

    fn harness() -> (BridgeDispatcher<AtProtoAdapter>, Arc<SqliteStore>, Arc<RecordingPublisher>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let signer = Arc::new(Signer::new(Keys::generate(), b"secret".to_vec()));
        let publisher = Arc::new(RecordingPublisher::new());
        let config = Arc::new(BridgeConfig::default());
        let dispatcher = BridgeDispatcher::new(
            AtProtoAdapter,
            Box::new(EmptyFetch),
            store.clone() as Arc<dyn Store>,
            signer,
            publisher.clone() as Arc<dyn RelayPublisher>,
            config,
        );
        (dispatcher, store, publisher)
    }

    #[tokio::test]
    async fn scenario_6_loop_guard_skips_already_mapped_like() {
        let (dispatcher, store, publisher) = harness();
        store.put_mapping("at://did:plc:x/app.bsky.feed.like/k", "E").await.unwrap();

        let notification = Notification {
            reason: NotificationReason::Like,
            foreign_id: "at://did:plc:x/app.bsky.feed.like/k".to_string(),
            actor_id: "did:plc:other".to_string(),
            raw: json!({"subject": {"uri": "at://did:plc:local/app.bsky.feed.post/p"}}),
        };

        dispatcher.dispatch_notification(&notification).await.unwrap();

        assert!(publisher.events.lock().unwrap().is_empty());
        assert_eq!(
            store.get_nostr_for("at://did:plc:x/app.bsky.feed.like/k").await.unwrap(),
            Some("E".to_string())
        );
    }

    #[tokio::test]
    async fn like_on_known_target_publishes_local_signed_reaction() {
        let (dispatcher, store, publisher) = harness();
        store.put_mapping("at://did:plc:local/app.bsky.feed.post/p", "E1").await.unwrap();

        let notification = Notification {
            reason: NotificationReason::Like,
            foreign_id: "at://did:plc:x/app.bsky.feed.like/k".to_string(),
            actor_id: "did:plc:other".to_string(),
            raw: json!({"subject": {"uri": "at://did:plc:local/app.bsky.feed.post/p"}}),
        };

        dispatcher.dispatch_notification(&notification).await.unwrap();

        let event_id = {
            let events = publisher.events.lock().unwrap();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].kind, Kind::Reaction);
            events[0].id.to_hex()
        };
        assert_eq!(
            store.get_nostr_for("at://did:plc:x/app.bsky.feed.like/k").await.unwrap(),
            Some(event_id)
        );
    }

    #[tokio::test]
    async fn follow_notification_records_edge_and_sends_dm() {
        let (dispatcher, store, publisher) = harness();
        let notification = Notification {
            reason: NotificationReason::Follow,
            foreign_id: "at://did:plc:x/app.bsky.graph.follow/k".to_string(),
            actor_id: "bsky:did:plc:x".to_string(),
            raw: json!({}),
        };

        dispatcher.dispatch_notification(&notification).await.unwrap();

        let edges = store.list_by_follower("bsky:did:plc:x").await.unwrap();
        assert_eq!(edges.len(), 1);
        let events = publisher.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, Kind::EncryptedDirectMessage);
    }

    #[tokio::test]
    async fn reply_notification_with_no_parent_reference_falls_back_to_dm() {
        let (dispatcher, _store, publisher) = harness();
        let notification = Notification {
            reason: NotificationReason::Reply,
            foreign_id: "at://did:plc:x/app.bsky.feed.post/r1".to_string(),
            actor_id: "did:plc:x".to_string(),
            raw: json!({"text": "hi"}),
        };

        dispatcher.dispatch_notification(&notification).await.unwrap();

        let events = publisher.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, Kind::EncryptedDirectMessage);
    }

    #[tokio::test]
    async fn dispatch_item_bridges_top_level_post() {
        let (dispatcher, store, publisher) = harness();
        let item = FetchedItem {
            foreign_id: "at://did:plc:x/app.bsky.feed.post/p1".to_string(),
            author_id: "did:plc:x".to_string(),
            timestamp: 1,
            raw: json!({"text": "hello world"}),
        };

        dispatcher.dispatch_item(&item).await.unwrap();

        let event_id = {
            let events = publisher.events.lock().unwrap();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].kind, Kind::TextNote);
            events[0].id.to_hex()
        };
        assert_eq!(
            store.get_nostr_for("at://did:plc:x/app.bsky.feed.post/p1").await.unwrap(),
            Some(event_id)
        );
    }
}
