//! Contact registration notifications
//!
//! Components that wait for a device to (re-)register, such as push
//! notification dispatch, subscribe to the AOR key instead of polling.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::record::ExtendedContact;

/// Callback for "this device just registered"
pub trait ContactRegisteredListener: Send + Sync {
    fn on_contact_registered(&self, key: &str, contact: &ExtendedContact);
}

/// Topic -> listeners registry
pub struct ContactNotifier {
    listeners: DashMap<String, Vec<Arc<dyn ContactRegisteredListener>>>,
}

impl ContactNotifier {
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
        }
    }

    pub fn subscribe(&self, topic: &str, listener: Arc<dyn ContactRegisteredListener>) {
        debug!("New subscription on {}", topic);
        self.listeners.entry(topic.to_string()).or_default().push(listener);
    }

    /// Drop every listener of a topic; returns whether there were any
    pub fn unsubscribe(&self, topic: &str) -> bool {
        debug!("Unsubscribing from {}", topic);
        self.listeners.remove(topic).is_some()
    }

    pub fn has_subscribers(&self, topic: &str) -> bool {
        self.listeners
            .get(topic)
            .is_some_and(|listeners| !listeners.is_empty())
    }

    /// Invoke the listeners of `topic`; returns how many were called
    pub fn notify(&self, topic: &str, contact: &ExtendedContact) -> usize {
        // Clone out so callbacks may subscribe or unsubscribe
        let listeners = match self.listeners.get(topic) {
            Some(listeners) => listeners.clone(),
            None => return 0,
        };

        for listener in &listeners {
            listener.on_contact_registered(topic, contact);
        }
        listeners.len()
    }
}
