//! In-process record map

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::{outcome_from_error, RegistrarBackend};
use crate::config::RecordSettings;
use crate::record::Record;
use crate::types::{BindRequest, FetchOutcome};

/// Records kept in memory, lost on restart
pub struct MemoryBackend {
    /// Map of AOR key to record
    records: DashMap<String, Record>,

    settings: RecordSettings,
}

impl MemoryBackend {
    pub fn new(settings: RecordSettings) -> Self {
        Self {
            records: DashMap::new(),
            settings,
        }
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.records.iter().map(|entry| entry.key().clone()).collect()
    }

    fn remove_if_empty(&self, key: &str) {
        if self.records.remove_if(key, |_, record| record.is_empty()).is_some() {
            debug!("Dropped empty record {}", key);
        }
    }
}

#[async_trait]
impl RegistrarBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "internal"
    }

    async fn do_bind(
        &self,
        key: &str,
        is_domain: bool,
        request: &BindRequest,
        now: DateTime<Utc>,
    ) -> FetchOutcome {
        let result = {
            let mut entry = self
                .records
                .entry(key.to_string())
                .or_insert_with(|| Record::new(key, is_domain));

            // Work on a copy so a rejected request leaves the record untouched
            let mut updated = entry.clone();
            match updated.apply_bind(request, &self.settings, now) {
                Ok(()) => {
                    *entry = updated.clone();
                    Ok(updated)
                }
                Err(err) => Err(err),
            }
        };

        self.remove_if_empty(key);
        match result {
            Ok(record) => FetchOutcome::from_record(Some(record)),
            Err(err) => outcome_from_error(err),
        }
    }

    async fn do_fetch(&self, key: &str, now: DateTime<Utc>) -> FetchOutcome {
        let record = self.records.get_mut(key).map(|mut entry| {
            entry.clean_expired(now);
            entry.clone()
        });

        self.remove_if_empty(key);
        FetchOutcome::from_record(record)
    }

    async fn do_clear(&self, key: &str, call_id: &str, cseq: u32) -> FetchOutcome {
        let invalid = match self.records.get(key) {
            None => return FetchOutcome::NotFound,
            Some(record) => record.is_invalid_register(call_id, cseq),
        };

        if invalid {
            return FetchOutcome::Invalid(format!(
                "clear of {} is older than its bindings (call-id {}, cseq {})",
                key, call_id, cseq
            ));
        }

        self.records.remove(key);
        debug!("Cleared record {}", key);
        FetchOutcome::NotFound
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.records.retain(|_, record| {
            removed += record.clean_expired(now);
            !record.is_empty()
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContactSpec;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn register(call_id: &str, cseq: u32, uri: &str, expire: u32) -> BindRequest {
        BindRequest::new("sip:alice@example.com", call_id, cseq, expire).with_contact(ContactSpec::new(uri))
    }

    #[tokio::test]
    async fn test_bind_fetch_clear() {
        let backend = MemoryBackend::new(RecordSettings::default());
        let key = "alice@example.com";

        let outcome = backend
            .do_bind(key, false, &register("c1", 1, "sip:alice@10.0.0.1", 3600), t(0))
            .await;
        assert_eq!(outcome.record().map(Record::len), Some(1));

        let fetched = backend.do_fetch(key, t(10)).await.into_record().unwrap();
        assert_eq!(fetched.contacts()[0].expire_at, t(0) + Duration::seconds(3600));

        assert!(matches!(backend.do_clear(key, "c1", 1).await, FetchOutcome::Invalid(_)));
        assert!(matches!(backend.do_clear(key, "c1", 2).await, FetchOutcome::NotFound));
        assert!(matches!(backend.do_fetch(key, t(10)).await, FetchOutcome::NotFound));
        assert_eq!(backend.len(), 0);
    }

    #[tokio::test]
    async fn test_rejected_bind_leaves_record_untouched() {
        let backend = MemoryBackend::new(RecordSettings::default());
        let key = "alice@example.com";
        backend
            .do_bind(key, false, &register("c1", 5, "sip:alice@10.0.0.1", 3600), t(0))
            .await;

        let replay = register("c1", 4, "sip:alice@10.0.0.2", 3600);
        assert!(matches!(backend.do_bind(key, false, &replay, t(1)).await, FetchOutcome::Invalid(_)));

        let record = backend.do_fetch(key, t(2)).await.into_record().unwrap();
        assert_eq!(record.len(), 1);
        assert_eq!(record.contacts()[0].sip_uri, "sip:alice@10.0.0.1");
    }

    #[tokio::test]
    async fn test_expired_records_disappear() {
        let backend = MemoryBackend::new(RecordSettings::default());
        backend
            .do_bind("alice@example.com", false, &register("c1", 1, "sip:alice@10.0.0.1", 10), t(0))
            .await;

        assert!(backend.do_fetch("alice@example.com", t(5)).await.is_found());
        assert!(matches!(
            backend.do_fetch("alice@example.com", t(10)).await,
            FetchOutcome::NotFound
        ));
        assert_eq!(backend.len(), 0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let backend = MemoryBackend::new(RecordSettings::default());
        backend
            .do_bind("alice@example.com", false, &register("c1", 1, "sip:alice@10.0.0.1", 10), t(0))
            .await;
        backend
            .do_bind("alice@example.com", false, &register("c2", 1, "sip:alice@10.0.0.2", 100), t(0))
            .await;
        let bob = BindRequest::new("sip:bob@example.com", "c3", 1, 10)
            .with_contact(ContactSpec::new("sip:bob@10.0.0.3"));
        backend.do_bind("bob@example.com", false, &bob, t(0)).await;

        assert_eq!(backend.purge_expired(t(50)).await, 2);
        assert_eq!(backend.keys(), vec!["alice@example.com".to_string()]);
    }
}
