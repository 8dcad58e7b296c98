//! Binding records
//!
//! A [`Record`] is the set of bindings of one AOR. It owns the algorithms
//! that keep that set consistent: capacity-bounded insertion with
//! least-recently-refreshed eviction, replacement of stale registrations from
//! the same device or dialog, and expiry sweeps. Every backend applies binds
//! through [`Record::apply_bind`], so those rules do not depend on where the
//! record is stored.

pub mod contact;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RecordSettings;
use crate::error::{RegistrarError, Result};
use crate::types::BindRequest;
use crate::uri::SipUri;

pub use contact::ExtendedContact;

/// Host part of the key when all domains share one key space
pub const GLOBAL_DOMAIN: &str = "merged";

/// All bindings of one address-of-record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    key: String,
    is_domain: bool,
    version: u64,
    contacts: Vec<ExtendedContact>,
}

impl Record {
    /// Create an empty record for a key
    pub fn new(key: impl Into<String>, is_domain: bool) -> Self {
        Self {
            key: key.into(),
            is_domain,
            version: 0,
            contacts: Vec::new(),
        }
    }

    /// Create an empty record for an AOR
    pub fn for_uri(uri: &SipUri, use_global_domain: bool) -> Self {
        Self::new(Self::define_key(uri, use_global_domain), uri.user().is_none())
    }

    pub(crate) fn from_parts(
        key: String,
        is_domain: bool,
        version: u64,
        contacts: Vec<ExtendedContact>,
    ) -> Self {
        Self {
            key,
            is_domain,
            version,
            contacts,
        }
    }

    /// Storage key of an AOR: `user@host`, `user@merged` when domains are
    /// merged, or the bare host for a domain registration.
    pub fn define_key(uri: &SipUri, use_global_domain: bool) -> String {
        match uri.user() {
            None => uri.host().to_string(),
            Some(user) if use_global_domain => format!("{}@{}", user, GLOBAL_DOMAIN),
            Some(user) => format!("{}@{}", user, uri.host()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Registered for a whole domain rather than a user
    pub fn is_domain(&self) -> bool {
        self.is_domain
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn contacts(&self) -> &[ExtendedContact] {
        &self.contacts
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn find_by_contact_id(&self, contact_id: &str) -> Option<&ExtendedContact> {
        self.contacts.iter().find(|c| c.contact_id == contact_id)
    }

    pub fn find_by_unique_id(&self, unique_id: &str) -> Option<&ExtendedContact> {
        self.contacts
            .iter()
            .find(|c| c.unique_id.as_deref() == Some(unique_id))
    }

    /// Add or refresh a binding, keeping at most `max_contacts` bindings.
    ///
    /// A binding with the same contact id is replaced in place. When the
    /// record is full, the binding refreshed least recently is evicted and
    /// returned; new registrations always succeed.
    pub fn insert_or_update_binding(
        &mut self,
        contact: ExtendedContact,
        settings: &RecordSettings,
    ) -> Vec<ExtendedContact> {
        let mut evicted = Vec::new();

        if settings.assume_unique_domains && self.is_domain {
            // A domain has a single writer: the new binding replaces all others
            evicted.append(&mut self.contacts);
        }

        if settings.max_contacts == 0 {
            info!("Dropping binding {} for {}: capacity is 0", contact.contact_id, self.key);
            return evicted;
        }

        let contact_id = contact.contact_id.clone();
        match self.contacts.iter_mut().find(|c| c.contact_id == contact_id) {
            Some(existing) => {
                debug!("Refreshing binding {} of {}", contact_id, self.key);
                *existing = contact;
            }
            None => {
                while self.contacts.len() >= settings.max_contacts {
                    match self.evict_oldest(None) {
                        Some(old) => evicted.push(old),
                        None => break,
                    }
                }
                debug!("Adding binding {} to {}", contact_id, self.key);
                self.contacts.push(contact);
            }
        }

        // A record loaded from a store may predate a lower capacity
        while self.contacts.len() > settings.max_contacts {
            match self.evict_oldest(Some(&contact_id)) {
                Some(old) => evicted.push(old),
                None => break,
            }
        }

        for old in &evicted {
            info!("Evicted binding {} from {}", old.contact_id, self.key);
        }
        evicted
    }

    fn evict_oldest(&mut self, keep: Option<&str>) -> Option<ExtendedContact> {
        let index = self
            .contacts
            .iter()
            .enumerate()
            .filter(|(_, c)| Some(c.contact_id.as_str()) != keep)
            .min_by_key(|(_, c)| c.updated_time)
            .map(|(i, _)| i)?;
        Some(self.contacts.remove(index))
    }

    /// Remove bindings superseded by an incoming registration: expired ones,
    /// ones from the same device (`unique_id`), and ones registered earlier
    /// in the same dialog (`call_id` with a lower cseq). Stamps `version`.
    pub fn clean(
        &mut self,
        unique_id: Option<&str>,
        call_id: &str,
        cseq: u32,
        now: DateTime<Utc>,
        version: u64,
    ) -> usize {
        let unique_id = unique_id.filter(|u| !u.is_empty());
        let before = self.contacts.len();

        self.contacts.retain(|c| {
            if c.is_expired(now) {
                return false;
            }
            if unique_id.is_some() && c.unique_id.as_deref() == unique_id {
                return false;
            }
            !(c.call_id == call_id && c.cseq < cseq)
        });
        self.version = version;

        let removed = before - self.contacts.len();
        if removed > 0 {
            debug!("Cleaned {} stale bindings from {}", removed, self.key);
        }
        removed
    }

    /// Remove expired bindings only
    pub fn clean_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.contacts.len();
        self.contacts.retain(|c| !c.is_expired(now));
        before - self.contacts.len()
    }

    /// A REGISTER is a duplicate or arrived out of order when a binding of
    /// the same dialog already has a cseq at least as high.
    pub fn is_invalid_register(&self, call_id: &str, cseq: u32) -> bool {
        self.contacts
            .iter()
            .any(|c| c.call_id == call_id && c.cseq >= cseq)
    }

    /// Latest expiry over all bindings
    pub fn latest_expire(&self) -> Option<DateTime<Utc>> {
        self.contacts.iter().map(|c| c.expire_at).max()
    }

    /// Latest expiry over bindings whose first path hop is `route`
    pub fn latest_expire_through(&self, route: &SipUri) -> Option<DateTime<Utc>> {
        self.contacts
            .iter()
            .filter(|c| c.is_routed_through(route))
            .map(|c| c.expire_at)
            .max()
    }

    /// Apply the contacts of a bind request: create or refresh bindings with
    /// a positive resolved expire, remove the ones with a zero expire.
    pub fn update(
        &mut self,
        request: &BindRequest,
        settings: &RecordSettings,
        now: DateTime<Utc>,
    ) -> Result<()> {
        for spec in &request.contacts {
            if spec.is_wildcard() {
                if spec.resolved_expire(request.global_expire) != 0 {
                    return Err(RegistrarError::InvalidRequest(
                        "wildcard contact requires a zero expire".to_string(),
                    ));
                }
                debug!("Removing all {} bindings of {}", self.contacts.len(), self.key);
                self.contacts.clear();
                continue;
            }

            match ExtendedContact::from_bind(spec, request, now)? {
                Some(contact) => {
                    self.insert_or_update_binding(contact, settings);
                }
                None => {
                    let uri: SipUri = spec.uri.parse()?;
                    if let Some(old) = self.remove_contact(&ExtendedContact::contact_id_of(&uri)) {
                        debug!("Unregistered {} from {}", old.contact_id, self.key);
                    }
                }
            }
        }
        Ok(())
    }

    /// The full bind sequence shared by every backend: reject out-of-order
    /// requests, drop superseded bindings, then apply the request.
    pub fn apply_bind(
        &mut self,
        request: &BindRequest,
        settings: &RecordSettings,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.is_invalid_register(&request.call_id, request.cseq) {
            info!(
                "Rejecting REGISTER for {}: call-id {} cseq {} is not newer",
                self.key, request.call_id, request.cseq
            );
            return Err(RegistrarError::InvalidRequest(format!(
                "out of order register (call-id {}, cseq {})",
                request.call_id, request.cseq
            )));
        }

        let version = self.version + 1;
        self.clean(None, &request.call_id, request.cseq, now, version);
        for spec in request.contacts.iter().filter(|s| !s.is_wildcard()) {
            let uri: SipUri = spec.uri.parse()?;
            let unique_id = spec
                .instance_id
                .as_deref()
                .map(contact::normalize_instance)
                .filter(|u| !u.is_empty())
                .or_else(|| uri.param("line").filter(|l| !l.is_empty()).map(str::to_string));
            if let Some(unique_id) = unique_id {
                self.clean(Some(&unique_id), &request.call_id, request.cseq, now, version);
            }
        }

        self.update(request, settings, now)
    }

    /// Merge a binding found while resolving several AORs. No capacity bound
    /// applies; of two bindings of the same endpoint the longer-lived wins.
    pub fn merge_contact(&mut self, contact: ExtendedContact) {
        match self
            .contacts
            .iter_mut()
            .find(|c| c.contact_id == contact.contact_id && c.sip_uri == contact.sip_uri)
        {
            Some(existing) => {
                if contact.expire_at > existing.expire_at {
                    *existing = contact;
                }
            }
            None => self.contacts.push(contact),
        }
    }

    /// Remove one binding by contact id
    pub fn remove_contact(&mut self, contact_id: &str) -> Option<ExtendedContact> {
        let index = self.contacts.iter().position(|c| c.contact_id == contact_id)?;
        Some(self.contacts.remove(index))
    }
}
