//! `rusqlite`-backed `Store` implementation.
//!
//! spec.md §1 scopes "SQL schema migrations, pragmas, and driver
//! selection" out of the core's specified contract, but the embedded
//! single-writer variant named in §5 needs a concrete choice to be
//! runnable and testable: WAL journal mode so readers never block the
//! writer, plus a `busy_timeout` retry-on-busy window instead of
//! surfacing `SQLITE_BUSY` contention to callers.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{BridgeError, Result};
use crate::types::{DerivedIdentity, FollowEdge, MappingStats};

use super::cache::MappingCache;
use super::Store;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS objects (
    foreign_id TEXT NOT NULL UNIQUE,
    nostr_id   TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS follows (
    follower_id TEXT NOT NULL,
    followed_id TEXT NOT NULL,
    UNIQUE(follower_id, followed_id)
);
CREATE TABLE IF NOT EXISTS derived_identities (
    pubkey        TEXT PRIMARY KEY,
    foreign_actor TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS audit_log (
    ts     INTEGER NOT NULL,
    action TEXT NOT NULL,
    detail TEXT NOT NULL
);
";

/// A small pool of connections to the same database file, each opened in
/// WAL mode with a busy timeout. Round-robin selection spreads readers
/// across connections; SQLite's own WAL semantics keep the single writer
/// from blocking them.
struct ConnectionPool {
    conns: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ConnectionPool {
    fn open(path: &Path, size: usize) -> rusqlite::Result<Self> {
        let mut conns = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open(path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.busy_timeout(std::time::Duration::from_millis(5000))?;
            conn.execute_batch(SCHEMA)?;
            conns.push(Mutex::new(conn));
        }
        Ok(Self {
            conns,
            next: AtomicUsize::new(0),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> rusqlite::Result<T> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.conns.len();
        let conn = self.conns[idx].lock().unwrap();
        f(&conn)
    }
}

pub struct SqliteStore {
    pool: std::sync::Arc<ConnectionPool>,
    cache: MappingCache,
}

impl SqliteStore {
    /// Open (creating if needed) a bounded pool of `pool_size`
    /// connections against `path`.
    pub fn open(path: impl AsRef<Path>, pool_size: usize) -> Result<Self> {
        let pool = ConnectionPool::open(path.as_ref(), pool_size.max(1))
            .map_err(BridgeError::Sqlite)?;
        Ok(Self {
            pool: std::sync::Arc::new(pool),
            cache: MappingCache::new(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        // `:memory:` can't be shared across connections, so an in-memory
        // store runs with a pool of one — fine for tests.
        let conn = Connection::open_in_memory().map_err(BridgeError::Sqlite)?;
        conn.execute_batch(SCHEMA).map_err(BridgeError::Sqlite)?;
        let pool = ConnectionPool {
            conns: vec![Mutex::new(conn)],
            next: AtomicUsize::new(0),
        };
        Ok(Self {
            pool: std::sync::Arc::new(pool),
            cache: MappingCache::new(),
        })
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ConnectionPool) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || f(&pool))
            .await
            .map_err(|e| BridgeError::Persistence(e.to_string()))?
            .map_err(BridgeError::Sqlite)
    }

    /// Authoritative DB read, bypassing the cache. Used to re-establish
    /// what's actually persisted after an insert is silently ignored.
    async fn fetch_nostr_for_db(&self, foreign_id: &str) -> Result<Option<String>> {
        let f = foreign_id.to_string();
        self.run_blocking(move |pool| {
            pool.with_conn(|conn| {
                conn.query_row(
                    "SELECT nostr_id FROM objects WHERE foreign_id = ?1",
                    params![f],
                    |row| row.get::<_, String>(0),
                )
                .optional()
            })
        })
        .await
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn put_mapping(&self, foreign_id: &str, nostr_id: &str) -> Result<()> {
        if let Some(existing) = self.cache.get_nostr_for(foreign_id) {
            if existing == nostr_id {
                return Ok(());
            }
        }
        let (f, n) = (foreign_id.to_string(), nostr_id.to_string());
        let rows_changed = self
            .run_blocking(move |pool| {
                pool.with_conn(|conn| {
                    // INSERT OR IGNORE: a duplicate key is not an error, per
                    // spec.md §4.1 — it signals a prior successful publish.
                    conn.execute(
                        "INSERT OR IGNORE INTO objects (foreign_id, nostr_id) VALUES (?1, ?2)",
                        params![f, n],
                    )
                })
            })
            .await?;

        if rows_changed == 1 {
            self.cache.insert(foreign_id, nostr_id);
        } else {
            // The insert was ignored — either foreign_id or nostr_id already
            // claimed a row under a different pairing. Cache what the DB
            // actually holds rather than the value we tried and failed to
            // persist.
            if let Some(authoritative) = self.fetch_nostr_for_db(foreign_id).await? {
                self.cache.insert(foreign_id, &authoritative);
            }
        }
        Ok(())
    }

    async fn get_nostr_for(&self, foreign_id: &str) -> Result<Option<String>> {
        if let Some(hit) = self.cache.get_nostr_for(foreign_id) {
            return Ok(Some(hit));
        }
        let result = self.fetch_nostr_for_db(foreign_id).await?;
        if let Some(ref nostr_id) = result {
            self.cache.insert(foreign_id, nostr_id);
        }
        Ok(result)
    }

    async fn get_foreign_for(&self, nostr_id: &str) -> Result<Option<String>> {
        if let Some(hit) = self.cache.get_foreign_for(nostr_id) {
            return Ok(Some(hit));
        }
        let n = nostr_id.to_string();
        let result = self
            .run_blocking(move |pool| {
                pool.with_conn(|conn| {
                    conn.query_row(
                        "SELECT foreign_id FROM objects WHERE nostr_id = ?1",
                        params![n],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()
                })
            })
            .await?;
        if let Some(ref foreign_id) = result {
            self.cache.insert(foreign_id, nostr_id);
        }
        Ok(result)
    }

    async fn delete_mapping(&self, foreign_id: &str, nostr_id: &str) -> Result<()> {
        let (f, n) = (foreign_id.to_string(), nostr_id.to_string());
        self.run_blocking(move |pool| {
            pool.with_conn(|conn| {
                conn.execute(
                    "DELETE FROM objects WHERE foreign_id = ?1 AND nostr_id = ?2",
                    params![f, n],
                )
            })
        })
        .await?;
        self.cache.evict(foreign_id, nostr_id);
        Ok(())
    }

    async fn add_follow(&self, follower_id: &str, followed_id: &str) -> Result<()> {
        let (a, b) = (follower_id.to_string(), followed_id.to_string());
        self.run_blocking(move |pool| {
            pool.with_conn(|conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO follows (follower_id, followed_id) VALUES (?1, ?2)",
                    params![a, b],
                )
            })
        })
        .await?;
        Ok(())
    }

    async fn remove_follow(&self, follower_id: &str, followed_id: &str) -> Result<()> {
        let (a, b) = (follower_id.to_string(), followed_id.to_string());
        self.run_blocking(move |pool| {
            pool.with_conn(|conn| {
                conn.execute(
                    "DELETE FROM follows WHERE follower_id = ?1 AND followed_id = ?2",
                    params![a, b],
                )
            })
        })
        .await?;
        Ok(())
    }

    async fn list_by_followed(&self, followed_id: &str) -> Result<Vec<FollowEdge>> {
        let b = followed_id.to_string();
        self.run_blocking(move |pool| {
            pool.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT follower_id, followed_id FROM follows WHERE followed_id = ?1",
                )?;
                let rows = stmt
                    .query_map(params![b], |row| {
                        Ok(FollowEdge {
                            follower_id: row.get(0)?,
                            followed_id: row.get(1)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
        })
        .await
    }

    async fn list_by_follower(&self, follower_id: &str) -> Result<Vec<FollowEdge>> {
        let a = follower_id.to_string();
        self.run_blocking(move |pool| {
            pool.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT follower_id, followed_id FROM follows WHERE follower_id = ?1",
                )?;
                let rows = stmt
                    .query_map(params![a], |row| {
                        Ok(FollowEdge {
                            follower_id: row.get(0)?,
                            followed_id: row.get(1)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
        })
        .await
    }

    async fn store_derived_identity(&self, pubkey: &str, foreign_actor_id: &str) -> Result<()> {
        let (p, a) = (pubkey.to_string(), foreign_actor_id.to_string());
        self.run_blocking(move |pool| {
            pool.with_conn(|conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO derived_identities (pubkey, foreign_actor) VALUES (?1, ?2)",
                    params![p, a],
                )
            })
        })
        .await?;
        Ok(())
    }

    async fn lookup_actor_by_pubkey(&self, pubkey: &str) -> Result<Option<String>> {
        let p = pubkey.to_string();
        self.run_blocking(move |pool| {
            pool.with_conn(|conn| {
                conn.query_row(
                    "SELECT foreign_actor FROM derived_identities WHERE pubkey = ?1",
                    params![p],
                    |row| row.get::<_, String>(0),
                )
                .optional()
            })
        })
        .await
    }

    async fn list_derived_identities(&self) -> Result<Vec<DerivedIdentity>> {
        self.run_blocking(move |pool| {
            pool.with_conn(|conn| {
                let mut stmt =
                    conn.prepare("SELECT pubkey, foreign_actor FROM derived_identities")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(DerivedIdentity {
                            derived_pubkey: row.get(0)?,
                            foreign_actor_id: row.get(1)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
        })
        .await
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let k = key.to_string();
        self.run_blocking(move |pool| {
            pool.with_conn(|conn| {
                conn.query_row("SELECT value FROM kv WHERE key = ?1", params![k], |row| {
                    row.get::<_, String>(0)
                })
                .optional()
            })
        })
        .await
    }

    async fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        let (k, v) = (key.to_string(), value.to_string());
        self.run_blocking(move |pool| {
            pool.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO kv (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![k, v],
                )
            })
        })
        .await?;
        Ok(())
    }

    async fn mapping_stats(&self) -> Result<MappingStats> {
        self.run_blocking(move |pool| {
            pool.with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT foreign_id FROM objects")?;
                let mut stats = MappingStats::default();
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                for row in rows {
                    let foreign_id = row?;
                    if foreign_id.starts_with("http") {
                        stats.activitypub_count += 1;
                    } else if foreign_id.starts_with("at://") || foreign_id.starts_with("bsky:") {
                        stats.atproto_count += 1;
                    } else {
                        stats.other_count += 1;
                    }
                }
                Ok(stats)
            })
        })
        .await
    }

    async fn record_audit(&self, action: &str, detail: &str) -> Result<()> {
        let (a, d) = (action.to_string(), detail.to_string());
        self.run_blocking(move |pool| {
            pool.with_conn(|conn| {
                let ts = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs() as i64;
                conn.execute(
                    "INSERT INTO audit_log (ts, action, detail) VALUES (?1, ?2, ?3)",
                    params![ts, a, d],
                )
            })
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("bridge.sqlite"), 2).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn put_mapping_is_idempotent() {
        let (store, _dir) = temp_store();
        store.put_mapping("foreign-1", "eid1").await.unwrap();
        store.put_mapping("foreign-1", "eid1").await.unwrap();
        assert_eq!(
            store.get_nostr_for("foreign-1").await.unwrap(),
            Some("eid1".to_string())
        );
    }

    #[tokio::test]
    async fn get_nostr_for_missing_is_none_not_error() {
        let (store, _dir) = temp_store();
        assert_eq!(store.get_nostr_for("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_then_retranslate_does_not_resurrect_cache() {
        let (store, _dir) = temp_store();
        store.put_mapping("foreign-1", "eid1").await.unwrap();
        store.delete_mapping("foreign-1", "eid1").await.unwrap();
        assert_eq!(store.get_nostr_for("foreign-1").await.unwrap(), None);
        assert_eq!(store.get_foreign_for("eid1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_mapping_with_conflicting_value_does_not_cache_the_ignored_write() {
        let (store, _dir) = temp_store();
        store.put_mapping("foreign-1", "eid1").await.unwrap();
        // foreign-1 is already claimed by eid1; this insert is ignored.
        store.put_mapping("foreign-1", "eid2").await.unwrap();
        assert_eq!(
            store.get_nostr_for("foreign-1").await.unwrap(),
            Some("eid1".to_string())
        );
    }

    #[tokio::test]
    async fn list_by_followed_filtered_narrows_by_protocol_prefix() {
        let (store, _dir) = temp_store();
        store.add_follow("https://ap.example/users/a", "local").await.unwrap();
        store.add_follow("bsky:did:plc:x", "local").await.unwrap();

        let ap_only = store
            .list_by_followed_filtered("local", crate::types::ForeignProtocol::ActivityPub)
            .await
            .unwrap();
        assert_eq!(ap_only.len(), 1);
        assert_eq!(ap_only[0].follower_id, "https://ap.example/users/a");

        let at_only = store
            .list_by_followed_filtered("local", crate::types::ForeignProtocol::AtProto)
            .await
            .unwrap();
        assert_eq!(at_only.len(), 1);
        assert_eq!(at_only[0].follower_id, "bsky:did:plc:x");
    }

    #[tokio::test]
    async fn follow_edges_are_idempotent_and_listable() {
        let (store, _dir) = temp_store();
        store.add_follow("https://ap.example/users/a", "bsky:did:plc:x").await.unwrap();
        store.add_follow("https://ap.example/users/a", "bsky:did:plc:x").await.unwrap();
        let edges = store.list_by_follower("https://ap.example/users/a").await.unwrap();
        assert_eq!(edges.len(), 1);
        store.remove_follow("https://ap.example/users/a", "bsky:did:plc:x").await.unwrap();
        assert!(store.list_by_follower("https://ap.example/users/a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn kv_upsert_overwrites() {
        let (store, _dir) = temp_store();
        store.kv_set("bsky_last_seen_at", "2024-01-01T00:00:00Z").await.unwrap();
        store.kv_set("bsky_last_seen_at", "2024-01-02T00:00:00Z").await.unwrap();
        assert_eq!(
            store.kv_get("bsky_last_seen_at").await.unwrap(),
            Some("2024-01-02T00:00:00Z".to_string())
        );
    }

    #[tokio::test]
    async fn mapping_stats_partition_by_prefix() {
        let (store, _dir) = temp_store();
        store.put_mapping("https://ap.example/notes/1", "eid1").await.unwrap();
        store.put_mapping("at://did:plc:x/app.bsky.feed.post/1", "eid2").await.unwrap();
        let stats = store.mapping_stats().await.unwrap();
        assert_eq!(stats.activitypub_count, 1);
        assert_eq!(stats.atproto_count, 1);
    }
}
