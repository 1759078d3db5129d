//! Polling Scheduler (spec.md §4.6): one loop per foreign protocol, a
//! persisted high-water-mark cursor, and a fixed notification-dispatch
//! table.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::store::Store;
use crate::types::NotificationReason;

/// One fetched item, newest-first order as the foreign API returns it.
pub struct FetchedItem {
    pub foreign_id: String,
    pub author_id: String,
    pub timestamp: i64,
    pub raw: serde_json::Value,
}

/// A pending inbound notification (follow/like/repost/reply/mention/quote).
pub struct Notification {
    pub reason: NotificationReason,
    pub foreign_id: String,
    pub actor_id: String,
    pub raw: serde_json::Value,
}

/// The foreign-network operations a poll loop needs; implemented per
/// protocol by the outbound collaborator (spec.md §4.7 draws the same
/// line: this core specifies the contract, not the HTTP/XRPC plumbing).
#[async_trait::async_trait]
pub trait ForeignSource: Send + Sync {
    /// K/V key this source's high-water mark is persisted under.
    fn high_water_mark_key(&self) -> &str;

    /// Fetch up to `limit` items newest-first, strictly after `since`
    /// (`since` is `None` on the very first poll).
    async fn fetch_latest(&self, since: Option<i64>, limit: usize) -> Result<Vec<FetchedItem>>;

    /// Pending notifications since the last poll.
    async fn fetch_notifications(&self) -> Result<Vec<Notification>>;
}

/// What the scheduler does with one timeline item — supplied by the
/// pipeline (kept decoupled here so the loop is unit-testable without a
/// real Persistence/Builder/Signer stack).
#[async_trait::async_trait]
pub trait ItemDispatcher: Send + Sync {
    async fn dispatch_item(&self, item: &FetchedItem) -> Result<()>;
    async fn dispatch_notification(&self, notification: &Notification) -> Result<()>;
    /// Emit at most one kind-0 profile publish per author per cycle.
    async fn publish_profile_if_new(&self, author_id: &str) -> Result<()>;
}

pub struct PollConfig {
    pub interval: Duration,
    pub fetch_limit: usize,
}

/// Run the poll loop until `cancel` fires. An immediate poll runs before
/// the first tick; `trigger` is an optional out-of-band poll signal — a
/// sender that's never used just means tick-only polling.
pub async fn run_poll_loop(
    source: &dyn ForeignSource,
    dispatcher: &dyn ItemDispatcher,
    store: &dyn Store,
    config: PollConfig,
    mut trigger: mpsc::Receiver<()>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.interval);
    interval.tick().await; // first tick fires immediately; consume it so the loop below runs once right away

    loop {
        if cancel.is_cancelled() {
            return;
        }
        run_one_cycle(source, dispatcher, store, config.fetch_limit).await;

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
            _ = trigger.recv() => {}
        }
    }
}

async fn run_one_cycle(
    source: &dyn ForeignSource,
    dispatcher: &dyn ItemDispatcher,
    store: &dyn Store,
    fetch_limit: usize,
) {
    let hwm_key = source.high_water_mark_key();
    let since = match store.kv_get(hwm_key).await {
        Ok(v) => v.and_then(|s| s.parse::<i64>().ok()),
        Err(e) => {
            warn!(error = %e, "persistence read failed fetching high-water mark");
            None
        }
    };

    let items = match source.fetch_latest(since, fetch_limit).await {
        Ok(items) => items,
        Err(e) => {
            warn!(error = %e, "foreign fetch failed for poll cycle");
            Vec::new()
        }
    };

    // newest-first from the API; process oldest-first (spec.md §5).
    let mut oldest_first = items;
    oldest_first.reverse();

    let mut profile_dedup: HashSet<String> = HashSet::new();
    let mut max_timestamp = since;

    for item in &oldest_first {
        if profile_dedup.insert(item.author_id.clone()) {
            if let Err(e) = dispatcher.publish_profile_if_new(&item.author_id).await {
                warn!(error = %e, author = %item.author_id, "profile publish failed");
            }
        }

        match dispatcher.dispatch_item(item).await {
            Ok(()) => {
                max_timestamp = Some(max_timestamp.map_or(item.timestamp, |m| m.max(item.timestamp)));
            }
            Err(e) => {
                warn!(error = %e, foreign_id = %item.foreign_id, "item dispatch failed, not advancing past it");
            }
        }
    }

    if let Some(max_ts) = max_timestamp {
        if let Err(e) = store.kv_set(hwm_key, &max_ts.to_string()).await {
            warn!(error = %e, "failed to persist high-water mark");
        }
    }

    match source.fetch_notifications().await {
        Ok(notifications) => {
            for notification in notifications {
                if let Err(e) = dispatcher.dispatch_notification(&notification).await {
                    warn!(error = %e, foreign_id = %notification.foreign_id, "notification dispatch failed");
                }
            }
        }
        Err(e) => warn!(error = %e, "fetching notifications failed"),
    }

    let poll_ts_key = format!("{hwm_key}_last_poll_at");
    let now = chrono::Utc::now().to_rfc3339();
    if let Err(e) = store.kv_set(&poll_ts_key, &now).await {
        warn!(error = %e, "failed to record last successful poll timestamp");
    }
    info!(items = oldest_first.len(), "poll cycle complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        items: Vec<FetchedItem>,
    }

    #[async_trait::async_trait]
    impl ForeignSource for FakeSource {
        fn high_water_mark_key(&self) -> &str {
            "test_last_seen_at"
        }

        async fn fetch_latest(&self, since: Option<i64>, _limit: usize) -> Result<Vec<FetchedItem>> {
            Ok(self
                .items
                .iter()
                .filter(|i| since.is_none_or(|s| i.timestamp > s))
                .map(|i| FetchedItem {
                    foreign_id: i.foreign_id.clone(),
                    author_id: i.author_id.clone(),
                    timestamp: i.timestamp,
                    raw: i.raw.clone(),
                })
                .collect())
        }

        async fn fetch_notifications(&self) -> Result<Vec<Notification>> {
            Ok(Vec::new())
        }
    }

    struct RecordingDispatcher {
        order: std::sync::Mutex<Vec<String>>,
        profile_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ItemDispatcher for RecordingDispatcher {
        async fn dispatch_item(&self, item: &FetchedItem) -> Result<()> {
            self.order.lock().unwrap().push(item.foreign_id.clone());
            Ok(())
        }
        async fn dispatch_notification(&self, _n: &Notification) -> Result<()> {
            Ok(())
        }
        async fn publish_profile_if_new(&self, _author_id: &str) -> Result<()> {
            self.profile_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn cycle_processes_oldest_first_and_advances_high_water_mark() {
        let store = SqliteStore::open_in_memory().unwrap();
        let source = FakeSource {
            items: vec![
                FetchedItem { foreign_id: "p3".into(), author_id: "a".into(), timestamp: 30, raw: serde_json::json!({}) },
                FetchedItem { foreign_id: "p2".into(), author_id: "a".into(), timestamp: 20, raw: serde_json::json!({}) },
                FetchedItem { foreign_id: "p1".into(), author_id: "a".into(), timestamp: 10, raw: serde_json::json!({}) },
            ],
        };
        let dispatcher = RecordingDispatcher { order: Default::default(), profile_calls: AtomicUsize::new(0) };

        run_one_cycle(&source, &dispatcher, &store, 50).await;

        assert_eq!(*dispatcher.order.lock().unwrap(), vec!["p1", "p2", "p3"]);
        assert_eq!(dispatcher.profile_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.kv_get("test_last_seen_at").await.unwrap(), Some("30".to_string()));
    }

    #[tokio::test]
    async fn high_water_mark_never_decreases_across_cycles() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.kv_set("test_last_seen_at", "100").await.unwrap();
        let source = FakeSource {
            items: vec![FetchedItem { foreign_id: "old".into(), author_id: "a".into(), timestamp: 5, raw: serde_json::json!({}) }],
        };
        let dispatcher = RecordingDispatcher { order: Default::default(), profile_calls: AtomicUsize::new(0) };

        run_one_cycle(&source, &dispatcher, &store, 50).await;

        assert_eq!(store.kv_get("test_last_seen_at").await.unwrap(), Some("100".to_string()));
        assert!(dispatcher.order.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cycle_completion_updates_last_poll_even_with_zero_items() {
        let store = SqliteStore::open_in_memory().unwrap();
        let source = FakeSource { items: vec![] };
        let dispatcher = RecordingDispatcher { order: Default::default(), profile_calls: AtomicUsize::new(0) };

        run_one_cycle(&source, &dispatcher, &store, 50).await;

        assert!(store.kv_get("test_last_seen_at_last_poll_at").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cancellation_stops_loop_without_starting_new_work() {
        let store = SqliteStore::open_in_memory().unwrap();
        let source = FakeSource { items: vec![] };
        let dispatcher = RecordingDispatcher { order: Default::default(), profile_calls: AtomicUsize::new(0) };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (_tx, rx) = mpsc::channel(1);

        run_poll_loop(
            &source,
            &dispatcher,
            &store,
            PollConfig { interval: Duration::from_secs(30), fetch_limit: 50 },
            rx,
            cancel,
        )
        .await;

        assert!(dispatcher.order.lock().unwrap().is_empty());
    }
}
