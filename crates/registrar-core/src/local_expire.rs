//! Local liveness index
//!
//! Tracks, per AOR key, the latest expiry among bindings reachable through
//! this node. A shared remote store knows about bindings registered through
//! other proxies too; this index only counts what this node is responsible
//! for. It is the one structure touched from the expiry timer, hence the lock.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::record::Record;
use crate::uri::SipUri;

pub struct LocalRegExpire {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
    /// Route of this node; without one every binding counts as local
    preferred_route: Option<SipUri>,
}

impl LocalRegExpire {
    pub fn new(preferred_route: Option<SipUri>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            preferred_route,
        }
    }

    /// Recompute the entry of a record after it changed
    pub fn update(&self, record: &Record) {
        let latest = match &self.preferred_route {
            Some(route) => record.latest_expire_through(route),
            None => record.latest_expire(),
        };

        let mut entries = self.entries.lock();
        match latest {
            Some(expire) => {
                entries.insert(record.key().to_string(), expire);
            }
            None => {
                entries.remove(record.key());
            }
        }
    }

    pub fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Drop every key whose latest local expiry is at or before `threshold`
    pub fn remove_expired_before(&self, threshold: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, expire| *expire > threshold);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Removed {} expired local registrations", removed);
        }
        removed
    }

    /// Number of AORs with at least one live local binding
    pub fn count_actives(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn get(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.lock().get(key).copied()
    }
}
