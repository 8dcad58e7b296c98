//! Remote key/value store backend
//!
//! Records are serialized whole under `<prefix><key>`. The network client of
//! the store (Redis in production) implements [`KeyValueStore`]; this module
//! only knows the four commands the location service needs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use super::{outcome_from_error, RegistrarBackend};
use crate::config::RecordSettings;
use crate::error::{RegistrarError, Result};
use crate::record::Record;
use crate::serializer::RecordSerializer;
use crate::types::{BindRequest, FetchOutcome};

/// Commands of the remote store used by the location service
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Publish a message on a pub/sub topic
    async fn publish(&self, topic: &str, message: &str) -> Result<()>;
}

/// Capacity of the published message channel
const PUBLISH_CHANNEL_CAPACITY: usize = 256;

/// In-process [`KeyValueStore`], for tests and single-node setups
pub struct MemoryKeyValueStore {
    entries: DashMap<String, Vec<u8>>,
    messages: broadcast::Sender<(String, String)>,
    unavailable: AtomicBool,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        let (messages, _) = broadcast::channel(PUBLISH_CHANNEL_CAPACITY);
        Self {
            entries: DashMap::new(),
            messages,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Receive `(topic, message)` pairs published from now on
    pub fn subscribe_messages(&self) -> broadcast::Receiver<(String, String)> {
        self.messages.subscribe()
    }

    /// Simulate the store going down (every command fails) or coming back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RegistrarError::Backend("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.check_available()?;
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn publish(&self, topic: &str, message: &str) -> Result<()> {
        self.check_available()?;
        // No receiver is not an error: nobody listens yet
        let _ = self.messages.send((topic.to_string(), message.to_string()));
        Ok(())
    }
}

/// Backend storing serialized records in a [`KeyValueStore`]
pub struct RemoteBackend {
    store: Arc<dyn KeyValueStore>,
    serializer: Box<dyn RecordSerializer>,
    settings: RecordSettings,
    prefix: String,
    /// Serialises read-modify-write of one key on this node
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RemoteBackend {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        serializer: Box<dyn RecordSerializer>,
        settings: RecordSettings,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            serializer,
            settings,
            prefix: prefix.into(),
            locks: DashMap::new(),
        }
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock of `key` once no other task holds or waits on it
    fn release_lock(&self, key: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn load(&self, key: &str) -> Result<Option<Record>> {
        match self.store.get(&self.store_key(key)).await? {
            Some(data) => Ok(Some(self.serializer.deserialize(&data)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &Record) -> Result<()> {
        let data = self.serializer.serialize(record)?;
        self.store.set(&self.store_key(record.key()), data).await
    }

    async fn bind_locked(
        &self,
        key: &str,
        is_domain: bool,
        request: &BindRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<Record>> {
        let mut record = self
            .load(key)
            .await?
            .unwrap_or_else(|| Record::new(key, is_domain));
        let previous_version = record.version();

        record.apply_bind(request, &self.settings, now)?;

        if record.is_empty() {
            self.store.delete(&self.store_key(key)).await?;
            return Ok(None);
        }

        debug!(
            "Storing {} (version {} -> {}) with {} serializer",
            key,
            previous_version,
            record.version(),
            self.serializer.name()
        );
        self.save(&record).await?;

        // Let other nodes know which devices just registered
        for contact in record
            .contacts()
            .iter()
            .filter(|c| c.call_id == request.call_id && c.cseq == request.cseq)
        {
            if let Some(unique_id) = &contact.unique_id {
                if let Err(e) = self.store.publish(key, unique_id).await {
                    warn!("Failed to publish registration of {} on {}: {}", unique_id, key, e);
                }
            }
        }

        Ok(Some(record))
    }

    async fn clear_locked(&self, key: &str, call_id: &str, cseq: u32) -> FetchOutcome {
        let record = match self.load(key).await {
            Ok(Some(record)) => record,
            Ok(None) => return FetchOutcome::NotFound,
            Err(err) => return FetchOutcome::Error(err),
        };

        if record.is_invalid_register(call_id, cseq) {
            return FetchOutcome::Invalid(format!(
                "clear of {} is older than its bindings (call-id {}, cseq {})",
                key, call_id, cseq
            ));
        }

        match self.store.delete(&self.store_key(key)).await {
            Ok(()) => {
                debug!("Cleared record {}", key);
                FetchOutcome::NotFound
            }
            Err(err) => FetchOutcome::Error(err),
        }
    }
}

#[async_trait]
impl RegistrarBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn do_bind(
        &self,
        key: &str,
        is_domain: bool,
        request: &BindRequest,
        now: DateTime<Utc>,
    ) -> FetchOutcome {
        let lock = self.lock_for(key);
        let result = {
            let _guard = lock.lock().await;
            self.bind_locked(key, is_domain, request, now).await
        };
        self.release_lock(key, lock);

        match result {
            Ok(record) => FetchOutcome::from_record(record),
            Err(err) => {
                if matches!(err, RegistrarError::Backend(_) | RegistrarError::Serialization(_)) {
                    warn!("Bind of {} failed in remote store: {}", key, err);
                }
                outcome_from_error(err)
            }
        }
    }

    async fn do_fetch(&self, key: &str, now: DateTime<Utc>) -> FetchOutcome {
        match self.load(key).await {
            Ok(Some(mut record)) => {
                record.clean_expired(now);
                FetchOutcome::from_record(Some(record))
            }
            Ok(None) => FetchOutcome::NotFound,
            Err(err) => {
                warn!("Fetch of {} failed in remote store: {}", key, err);
                FetchOutcome::Error(err)
            }
        }
    }

    async fn do_clear(&self, key: &str, call_id: &str, cseq: u32) -> FetchOutcome {
        let lock = self.lock_for(key);
        let outcome = {
            let _guard = lock.lock().await;
            self.clear_locked(key, call_id, cseq).await
        };
        self.release_lock(key, lock);
        outcome
    }
}
