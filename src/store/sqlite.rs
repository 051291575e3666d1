use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::Value;
use tokio::sync::oneshot;

use super::KeyValueStore;

const CURRENT_SCHEMA_VERSION: i32 = 1;

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

fn run_migrations(conn: &mut Connection) -> Result<()> {
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > CURRENT_SCHEMA_VERSION {
        bail!(
            "store version ({}) is newer than supported schema ({})",
            version,
            CURRENT_SCHEMA_VERSION
        );
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;

    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)
            .with_context(|| format!("migration to version {next_version} failed"))?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<()> {
    match version {
        1 => {
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS entries (
                     key TEXT PRIMARY KEY,
                     value TEXT NOT NULL
                 )",
            )
            .context("failed to create entries table")?;
            Ok(())
        }
        _ => bail!("unknown migration target version: {version}"),
    }
}

/// Durable key -> JSON store on SQLite.
///
/// All connection access runs on a dedicated worker thread; async callers
/// submit closures over an mpsc channel and await the reply on a oneshot.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<StoreInner>,
    db_path: Arc<PathBuf>,
}

impl SqliteStore {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create store directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("webdwell-store".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite store")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run store migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        StoreCommand::Shutdown => break,
                    }
                }

                info!("Store thread shutting down");
            })
            .with_context(|| "failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        info!("Durable store initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store thread terminated unexpectedly"))?
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, keys: &[String]) -> Result<HashMap<String, Value>> {
        let keys = keys.to_vec();
        self.execute(move |conn| {
            let mut stmt = conn.prepare("SELECT value FROM entries WHERE key = ?1")?;
            let mut found = HashMap::new();
            for key in keys {
                let raw: Option<String> = stmt
                    .query_row(params![key], |row| row.get(0))
                    .optional()
                    .with_context(|| format!("failed to read entry '{key}'"))?;
                if let Some(raw) = raw {
                    let value = serde_json::from_str(&raw)
                        .with_context(|| format!("corrupt JSON for entry '{key}'"))?;
                    found.insert(key, value);
                }
            }
            Ok(found)
        })
        .await
    }

    async fn set(&self, entries: HashMap<String, Value>) -> Result<()> {
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let raw = serde_json::to_string(&value)
                .with_context(|| format!("failed to encode entry '{key}'"))?;
            encoded.push((key, raw));
        }

        self.execute(move |conn| {
            let tx = conn.transaction().context("failed to open write transaction")?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO entries (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                )?;
                for (key, raw) in &encoded {
                    stmt.execute(params![key, raw])
                        .with_context(|| format!("failed to write entry '{key}'"))?;
                }
            }
            tx.commit().context("failed to commit entry batch")?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        let keys = keys.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction().context("failed to open delete transaction")?;
            {
                let mut stmt = tx.prepare("DELETE FROM entries WHERE key = ?1")?;
                for key in &keys {
                    stmt.execute(params![key])
                        .with_context(|| format!("failed to delete entry '{key}'"))?;
                }
            }
            tx.commit().context("failed to commit delete batch")?;
            Ok(())
        })
        .await
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM entries ORDER BY key")?;
            let mut rows = stmt.query([])?;
            let mut keys = Vec::new();
            while let Some(row) = rows.next()? {
                keys.push(row.get::<_, String>(0)?);
            }
            Ok(keys)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sqlite_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("store.sqlite3")).unwrap();

        let mut entries = HashMap::new();
        entries.insert("stats_2026-01-01".to_string(), json!({"example.com": 42}));
        entries.insert("paths_2026-01-01".to_string(), json!({"example.com": {"/": 42}}));
        store.set(entries).await.unwrap();

        let fetched = store
            .get(&["stats_2026-01-01".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched["stats_2026-01-01"], json!({"example.com": 42}));

        store.remove(&["paths_2026-01-01".to_string()]).await.unwrap();
        assert_eq!(
            store.list_keys().await.unwrap(),
            vec!["stats_2026-01-01".to_string()]
        );
    }

    #[tokio::test]
    async fn test_sqlite_store_overwrites_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("store.sqlite3")).unwrap();

        let mut entries = HashMap::new();
        entries.insert("k".to_string(), json!(1));
        store.set(entries).await.unwrap();

        let mut entries = HashMap::new();
        entries.insert("k".to_string(), json!(2));
        store.set(entries).await.unwrap();

        let fetched = store.get(&["k".to_string()]).await.unwrap();
        assert_eq!(fetched["k"], json!(2));
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite3");

        {
            let store = SqliteStore::new(path.clone()).unwrap();
            let mut entries = HashMap::new();
            entries.insert("alerts_2026-01-01".to_string(), json!({"example.com": true}));
            store.set(entries).await.unwrap();
        }

        let reopened = SqliteStore::new(path).unwrap();
        let fetched = reopened
            .get(&["alerts_2026-01-01".to_string()])
            .await
            .unwrap();
        assert_eq!(fetched["alerts_2026-01-01"], json!({"example.com": true}));
    }
}
