use std::{collections::HashMap, future::Future, path::Path, sync::Arc};

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{
    config::EngineConfig,
    expiry::ExpirySweeper,
    persistence::{ttl::TtlIndex, wal::Wal, Event, Record},
    Error, Result,
};

/// Operations the request-facing layer relies on.
pub trait Storage: Send + Sync {
    fn exists(&self, key: &str) -> impl Future<Output = bool> + Send;
    fn get(&self, key: &str) -> impl Future<Output = Option<Record>> + Send;
    fn get_all(&self) -> impl Future<Output = Vec<Record>> + Send;
    /// `$` in the pattern stands for any run of characters; matched against values.
    fn filter(&self, pattern: &str) -> impl Future<Output = Result<Vec<Record>>> + Send;
    fn set(&self, record: Record) -> impl Future<Output = Result<()>> + Send;
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
    fn delete_all(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Map and expiry index, only ever touched together.
struct State {
    records: HashMap<String, Record>,
    ttl: TtlIndex,
}

pub(crate) struct Shared {
    state: RwLock<State>,
    wal: Wal,
}

impl Shared {
    async fn set_locked(&self, state: &mut State, record: Record) -> Result<()> {
        self.wal.write(&Event::set(record.clone())).await?;

        match record.expiration_time {
            Some(until) => state.ttl.push(&record.key, until),
            None => state.ttl.delete(&record.key),
        }
        state.records.insert(record.key.clone(), record);
        Ok(())
    }

    async fn delete_locked(&self, state: &mut State, key: &str) -> Result<()> {
        self.wal.write(&Event::delete(key)).await?;

        state.ttl.delete(key);
        state.records.remove(key);
        Ok(())
    }

    pub(crate) async fn evict_expired(&self) -> Result<usize> {
        self.evict_expired_at(Utc::now()).await
    }

    async fn evict_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.write().await;
        let due = state.ttl.pop_after(now);

        for (evicted, key) in due.iter().enumerate() {
            if let Err(e) = self.delete_locked(&mut state, key).await {
                // keep the timers of everything not yet deleted so the next pass retries
                for key in &due[evicted..] {
                    if let Some(until) = state.records.get(key).and_then(|r| r.expiration_time) {
                        state.ttl.push(key, until);
                    }
                }
                return Err(e);
            }
            debug!(key = %key, "expired record removed");
        }

        Ok(due.len())
    }
}

/// Persistent key-value engine.
///
/// Every mutation is appended to the write-ahead log before it becomes visible
/// in memory. Reads never touch the disk.
pub struct Engine {
    shared: Arc<Shared>,
    sweeper: Mutex<Option<ExpirySweeper>>,
}

impl Engine {
    /// Opens the log in `config.data_dir`, replays it and starts the sweeper.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        Self::start(config, None).await
    }

    /// Like [`Engine::open`], with a sweeper that also stops once `shutdown` turns `true`.
    pub async fn open_with_shutdown(
        config: EngineConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        Self::start(config, Some(shutdown)).await
    }

    async fn start(config: EngineConfig, shutdown: Option<watch::Receiver<bool>>) -> Result<Self> {
        config.validate()?;
        let wal = Wal::open(&config.data_dir, config.max_record_size, config.sync_writes)?;
        let records = wal.read()?;

        let mut ttl = TtlIndex::new();
        for record in records.values() {
            if let Some(until) = record.expiration_time {
                ttl.push(&record.key, until);
            }
        }
        info!(records = records.len(), expiring = ttl.len(), "state recovered");

        let shared = Arc::new(Shared {
            state: RwLock::new(State { records, ttl }),
            wal,
        });

        let evicted = shared.evict_expired().await?;
        if evicted > 0 {
            info!(evicted, "records expired while offline removed");
        }

        let sweeper = ExpirySweeper::start(Arc::clone(&shared), config.sweep_interval, shutdown);

        Ok(Self {
            shared,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    pub fn wal_path(&self) -> &Path {
        self.shared.wal.path()
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.shared.state.read().await.records.contains_key(key)
    }

    /// Returns the record for `key`, including one that has expired but has
    /// not been swept yet.
    pub async fn get(&self, key: &str) -> Option<Record> {
        self.shared.state.read().await.records.get(key).cloned()
    }

    /// Stores `record`, replacing any previous record with the same key.
    ///
    /// A record whose expiration time has already passed is dropped without
    /// being logged.
    pub async fn set(&self, record: Record) -> Result<()> {
        if record.key.is_empty() {
            return Err(Error::InvalidRecord("key must not be empty".into()));
        }
        if record.is_expired_at(Utc::now()) {
            debug!(key = %record.key, "ignoring already expired record");
            return Ok(());
        }

        let mut state = self.shared.state.write().await;
        self.shared.set_locked(&mut state, record).await
    }

    /// Removes `key`. A tombstone is logged even if the key is absent.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.shared.state.write().await;
        self.shared.delete_locked(&mut state, key).await
    }

    pub async fn delete_all(&self) -> Result<()> {
        let mut state = self.shared.state.write().await;
        let keys: Vec<String> = state.records.keys().cloned().collect();

        for key in &keys {
            self.shared.delete_locked(&mut state, key).await?;
        }

        info!(deleted = keys.len(), "all records deleted");
        Ok(())
    }

    /// Snapshot of every record, ordered by key.
    pub async fn get_all(&self) -> Vec<Record> {
        let state = self.shared.state.read().await;
        sorted(state.records.values().cloned())
    }

    /// Records whose value matches `pattern`, ordered by key.
    pub async fn filter(&self, pattern: &str) -> Result<Vec<Record>> {
        let matcher = compile_pattern(pattern)?;
        let state = self.shared.state.read().await;
        Ok(sorted(
            state
                .records
                .values()
                .filter(|r| matcher.is_match(&r.value))
                .cloned(),
        ))
    }

    /// Records whose key matches `pattern`, ordered by key.
    pub async fn filter_keys(&self, pattern: &str) -> Result<Vec<Record>> {
        let matcher = compile_pattern(pattern)?;
        let state = self.shared.state.read().await;
        Ok(sorted(
            state
                .records
                .values()
                .filter(|r| matcher.is_match(&r.key))
                .cloned(),
        ))
    }

    pub async fn len(&self) -> usize {
        self.shared.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Runs one expiry pass now, returning how many records were removed.
    pub async fn evict_expired(&self) -> Result<usize> {
        self.shared.evict_expired().await
    }

    /// Rewrites the log from the live records, dropping tombstones and
    /// superseded writes.
    pub async fn compact(&self) -> Result<()> {
        let state = self.shared.state.write().await;
        self.shared.wal.compact(state.records.values()).await
    }

    /// Stops the sweeper, waits for it and closes the log. Later writes fail
    /// with [`Error::Closed`].
    pub async fn close(&self) -> Result<()> {
        if let Some(sweeper) = self.sweeper.lock().await.take() {
            sweeper.stop().await;
        }
        self.shared.wal.close().await?;
        info!("engine closed");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn sweeper_finished(&self) -> bool {
        self.sweeper
            .lock()
            .await
            .as_ref()
            .map_or(true, ExpirySweeper::is_finished)
    }
}

impl Storage for Engine {
    fn exists(&self, key: &str) -> impl Future<Output = bool> + Send {
        Engine::exists(self, key)
    }

    fn get(&self, key: &str) -> impl Future<Output = Option<Record>> + Send {
        Engine::get(self, key)
    }

    fn get_all(&self) -> impl Future<Output = Vec<Record>> + Send {
        Engine::get_all(self)
    }

    fn filter(&self, pattern: &str) -> impl Future<Output = Result<Vec<Record>>> + Send {
        Engine::filter(self, pattern)
    }

    fn set(&self, record: Record) -> impl Future<Output = Result<()>> + Send {
        Engine::set(self, record)
    }

    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send {
        Engine::delete(self, key)
    }

    fn delete_all(&self) -> impl Future<Output = Result<()>> + Send {
        Engine::delete_all(self)
    }
}

/// Turns a `$` wildcard pattern into a regular expression searched anywhere in the text.
fn compile_pattern(pattern: &str) -> Result<Regex> {
    let translated = pattern.replace('$', ".*");
    Regex::new(&translated).map_err(|e| {
        warn!(pattern, "rejected filter pattern");
        Error::InvalidPattern(e)
    })
}

fn sorted(records: impl Iterator<Item = Record>) -> Vec<Record> {
    let mut records: Vec<Record> = records.collect();
    records.sort_by(|a, b| a.key.cmp(&b.key));
    records
}
