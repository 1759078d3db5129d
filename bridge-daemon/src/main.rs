//! Process bootstrap: CLI/env argument parsing, config assembly, and
//! wiring the concrete `Store`/`Signer`/relay publisher before handing
//! control to `bridge-core`'s poll loops. Intentionally thin — this
//! binary has no logic the core test suite exercises.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use bridge_core::config::{IdentityConfig, PollConfig as CorePollConfig, RelayConfig};
use bridge_core::dispatch::{ActivityPubAdapter, AtProtoAdapter, BridgeDispatcher};
use bridge_core::relay::RelayPublisher;
use bridge_core::scheduler::{FetchedItem, ForeignSource, Notification, PollConfig};
use bridge_core::threading::{AncestorNode, ThreadFetch};
use bridge_core::{BridgeConfig, BridgeError, Result, Store};
use clap::Parser;
use nostr::{Event, Keys, RelayUrl};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bridge-daemon", about = "Nostr/ActivityPub/AT Protocol bridge")]
struct Args {
    /// Path to the SQLite database file.
    #[arg(long, env = "BRIDGE_DB_PATH", default_value = "bridge.sqlite")]
    db_path: String,

    /// Local Nostr identity's secret key, hex-encoded.
    #[arg(long, env = "BRIDGE_LOCAL_SECRET_KEY")]
    local_secret_key: String,

    /// Bridge-wide secret used to derive per-foreign-author keypairs.
    #[arg(long, env = "BRIDGE_SECRET")]
    bridge_secret: String,

    /// Local ActivityPub actor URL, mirrored on the Fediverse.
    #[arg(long, env = "BRIDGE_LOCAL_ACTOR_URL", default_value = "")]
    local_actor_url: String,

    /// Local domain, used for NIP-05 identifier synthesis.
    #[arg(long, env = "BRIDGE_LOCAL_DOMAIN", default_value = "")]
    local_domain: String,

    /// Relay URLs to publish translated events to.
    #[arg(long = "relay", env = "BRIDGE_RELAYS", value_delimiter = ',', default_values_t = vec!["wss://relay.damus.io".to_string(), "wss://nos.lol".to_string()])]
    relays: Vec<String>,

    /// Poll interval in seconds for both foreign protocols.
    #[arg(long, env = "BRIDGE_POLL_INTERVAL_SECS", default_value_t = 30)]
    poll_interval_secs: u64,
}

/// `RelayPublisher` backed by a real `nostr-sdk` client connection.
struct NostrSdkPublisher {
    client: nostr_sdk::Client,
}

#[async_trait::async_trait]
impl RelayPublisher for NostrSdkPublisher {
    async fn publish(&self, event: &Event) -> Result<()> {
        self.client
            .send_event(event)
            .await
            .map(|_| ())
            .map_err(|e| BridgeError::Publish(e.to_string()))
    }
}

/// `ForeignSource` placeholder: the HTTP/XRPC fetch client is the
/// excluded collaborator named in spec.md §1. This never yields items,
/// but wiring it through `run_poll_loop` for real means swapping it for
/// a real client is the only change needed once one exists.
struct NoForeignSource {
    hwm_key: &'static str,
}

#[async_trait::async_trait]
impl ForeignSource for NoForeignSource {
    fn high_water_mark_key(&self) -> &str {
        self.hwm_key
    }

    async fn fetch_latest(&self, _since: Option<i64>, _limit: usize) -> Result<Vec<FetchedItem>> {
        Ok(Vec::new())
    }

    async fn fetch_notifications(&self) -> Result<Vec<Notification>> {
        Ok(Vec::new())
    }
}

/// `ThreadFetch` placeholder, paired with `NoForeignSource` for the same reason.
struct NoThreadFetch;

#[async_trait::async_trait]
impl ThreadFetch for NoThreadFetch {
    async fn fetch_ancestors(&self, _foreign_id: &str) -> Result<Vec<AncestorNode>> {
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let local_keys = Keys::parse(&args.local_secret_key)?;

    let config = BridgeConfig {
        relay: RelayConfig {
            relays: args.relays.clone(),
            publish_timeout: Duration::from_secs(10),
        },
        poll: CorePollConfig {
            interval: Duration::from_secs(args.poll_interval_secs),
            fetch_limit: 50,
            foreign_call_timeout: Duration::from_secs(15),
        },
        identity: IdentityConfig {
            bridge_secret: args.bridge_secret.into_bytes(),
            local_pubkey: local_keys.public_key().to_hex(),
            local_actor_url: args.local_actor_url,
            local_domain: args.local_domain,
        },
        show_source_link: Arc::new(AtomicBool::new(true)),
        timeline_bridging_enabled: Arc::new(AtomicBool::new(false)),
    };

    let store: Arc<dyn Store> = Arc::new(bridge_core::store::SqliteStore::open(&args.db_path, 4)?);
    let signer = Arc::new(bridge_core::Signer::new(local_keys.clone(), config.identity.bridge_secret.clone()));
    let config = Arc::new(config);

    let client = nostr_sdk::Client::builder().signer(local_keys).build();
    for url in &config.relay.relays {
        if let Ok(relay_url) = RelayUrl::parse(url) {
            let _ = client.add_relay(relay_url).await;
        }
    }
    client.connect().await;
    let publisher: Arc<dyn RelayPublisher> = Arc::new(NostrSdkPublisher { client });

    tracing::info!(
        relays = ?config.relay.relays,
        poll_interval_secs = args.poll_interval_secs,
        "bridge starting"
    );

    let poll_config = || PollConfig {
        interval: Duration::from_secs(args.poll_interval_secs),
        fetch_limit: config.poll.fetch_limit,
    };
    let cancel = CancellationToken::new();

    let atproto_dispatcher = BridgeDispatcher::new(
        AtProtoAdapter,
        Box::new(NoThreadFetch),
        store.clone(),
        signer.clone(),
        publisher.clone(),
        config.clone(),
    );
    let atproto_source = NoForeignSource { hwm_key: "atproto_last_seen_at" };
    let (_atproto_trigger_tx, atproto_trigger_rx) = tokio::sync::mpsc::channel(1);
    let atproto_store = store.clone();
    let atproto_cancel = cancel.clone();
    let atproto_poll_config = poll_config();
    let atproto_task = tokio::spawn(async move {
        bridge_core::scheduler::run_poll_loop(
            &atproto_source,
            &atproto_dispatcher,
            atproto_store.as_ref(),
            atproto_poll_config,
            atproto_trigger_rx,
            atproto_cancel,
        )
        .await;
    });

    let activitypub_dispatcher = BridgeDispatcher::new(
        ActivityPubAdapter,
        Box::new(NoThreadFetch),
        store.clone(),
        signer.clone(),
        publisher.clone(),
        config.clone(),
    );
    let activitypub_source = NoForeignSource { hwm_key: "activitypub_last_seen_at" };
    let (_activitypub_trigger_tx, activitypub_trigger_rx) = tokio::sync::mpsc::channel(1);
    let activitypub_store = store.clone();
    let activitypub_cancel = cancel.clone();
    let activitypub_poll_config = poll_config();
    let activitypub_task = tokio::spawn(async move {
        bridge_core::scheduler::run_poll_loop(
            &activitypub_source,
            &activitypub_dispatcher,
            activitypub_store.as_ref(),
            activitypub_poll_config,
            activitypub_trigger_rx,
            activitypub_cancel,
        )
        .await;
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    cancel.cancel();
    let _ = tokio::join!(atproto_task, activitypub_task);
    Ok(())
}
