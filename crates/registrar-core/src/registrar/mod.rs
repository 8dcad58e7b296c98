//! Registrar database facade
//!
//! [`RegistrarDb`] is what the registrar, call routing and presence talk to.
//! It validates requests, builds the right fetch orchestration (plain,
//! recursive through aliases, joined with the domain registration) and
//! delegates storage to a [`RegistrarBackend`]. Every operation resolves to
//! a [`FetchOutcome`].

pub mod sweeper;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::backend::{KeyValueStore, MemoryBackend, RegistrarBackend, RemoteBackend};
use crate::config::{BackendKind, RegistrarConfig};
use crate::error::{RegistrarError, Result};
use crate::local_expire::LocalRegExpire;
use crate::notify::{ContactNotifier, ContactRegisteredListener};
use crate::record::Record;
use crate::resolver::{Aggregator, RecursiveResolver};
use crate::serializer::serializer_for;
use crate::types::{BindRequest, FetchOutcome};
use crate::uri::SipUri;

pub use sweeper::ExpirySweeper;

/// Cseq used by clears that do not come from a REGISTER
const UNSEQUENCED_CLEAR: u32 = u32::MAX;

/// Location service handle
pub struct RegistrarDb {
    config: RegistrarConfig,
    backend: Arc<dyn RegistrarBackend>,
    local_expire: Arc<LocalRegExpire>,
    notifier: ContactNotifier,
}

impl RegistrarDb {
    /// Create a registrar database over an explicit backend
    pub fn new(config: RegistrarConfig, backend: Arc<dyn RegistrarBackend>) -> Result<Self> {
        let preferred_route = match &config.preferred_route {
            Some(route) => Some(route.parse::<SipUri>().map_err(|_| {
                RegistrarError::ConfigError(format!("invalid preferred_route {}", route))
            })?),
            None => None,
        };

        info!(
            "Registrar database using {} backend, max {} contacts per AOR",
            backend.name(),
            config.max_contacts
        );

        Ok(Self {
            local_expire: Arc::new(LocalRegExpire::new(preferred_route)),
            notifier: ContactNotifier::new(),
            config,
            backend,
        })
    }

    /// In-process storage
    pub fn internal(config: RegistrarConfig) -> Result<Self> {
        let backend = Arc::new(MemoryBackend::new(config.record_settings()));
        Self::new(config, backend)
    }

    /// Remote storage through `store`, encoded with the configured serializer
    pub fn remote(config: RegistrarConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let backend = Arc::new(RemoteBackend::new(
            store,
            serializer_for(config.serializer),
            config.record_settings(),
            config.remote_key_prefix.clone(),
        ));
        Self::new(config, backend)
    }

    /// Backend chosen by `config.backend`; the remote one needs a store
    pub fn from_config(config: RegistrarConfig, store: Option<Arc<dyn KeyValueStore>>) -> Result<Self> {
        match (config.backend, store) {
            (BackendKind::Internal, _) => Self::internal(config),
            (BackendKind::Redis, Some(store)) => Self::remote(config, store),
            (BackendKind::Redis, None) => Err(RegistrarError::ConfigError(
                "redis backend selected without a store".to_string(),
            )),
        }
    }

    pub fn config(&self) -> &RegistrarConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn local_reg_expire(&self) -> &Arc<LocalRegExpire> {
        &self.local_expire
    }

    /// Storage key of an AOR
    pub fn key_for(&self, uri: &SipUri) -> String {
        Record::define_key(uri, self.config.use_global_domain)
    }

    /// Reject a bind carrying more live contacts than an AOR may hold
    pub fn check_contact_count(&self, request: &BindRequest) -> Result<()> {
        let count = request.live_contact_count();
        if count > self.config.max_contacts {
            return Err(RegistrarError::TooManyContacts {
                aor: request.aor.clone(),
                count,
                max: self.config.max_contacts,
            });
        }
        Ok(())
    }

    /// Add, refresh or remove the bindings of a REGISTER
    pub async fn bind(&self, request: &BindRequest) -> FetchOutcome {
        self.bind_at(request, Utc::now()).await
    }

    /// [`bind`](Self::bind) with an explicit current time
    pub async fn bind_at(&self, request: &BindRequest, now: DateTime<Utc>) -> FetchOutcome {
        let aor = match self.validate_bind(request) {
            Ok(aor) => aor,
            Err(RegistrarError::TooManyContacts { aor, count, max }) => {
                warn!("Rejecting bind of {} contacts for {} (max {})", count, aor, max);
                return FetchOutcome::Error(RegistrarError::TooManyContacts { aor, count, max });
            }
            Err(e) => {
                debug!("Invalid bind for {}: {}", request.aor, e);
                return FetchOutcome::Invalid(e.to_string());
            }
        };

        let key = self.key_for(&aor);
        debug!(
            "Binding {} contacts to {} (call-id {}, cseq {})",
            request.contacts.len(),
            key,
            request.call_id,
            request.cseq
        );

        let outcome = self
            .backend
            .do_bind(&key, aor.user().is_none(), request, now)
            .await;

        match &outcome {
            FetchOutcome::Found(record) => {
                self.local_expire.update(record);
                self.notify_bound(record, request);
            }
            FetchOutcome::NotFound => self.local_expire.remove(&key),
            FetchOutcome::Error(e) => warn!("Bind of {} failed: {}", key, e),
            FetchOutcome::Invalid(reason) => debug!("Bind of {} rejected: {}", key, reason),
        }
        outcome
    }

    fn validate_bind(&self, request: &BindRequest) -> Result<SipUri> {
        if request.call_id.trim().is_empty() {
            return Err(RegistrarError::InvalidRequest("missing call-id".to_string()));
        }
        let aor: SipUri = request.aor.parse()?;
        for contact in request.contacts.iter().filter(|c| !c.is_wildcard()) {
            contact.uri.parse::<SipUri>()?;
        }
        self.check_contact_count(request)?;
        Ok(aor)
    }

    fn notify_bound(&self, record: &Record, request: &BindRequest) {
        if !self.notifier.has_subscribers(record.key()) {
            return;
        }
        for contact in record
            .contacts()
            .iter()
            .filter(|c| c.call_id == request.call_id && c.cseq == request.cseq)
            .filter(|c| c.unique_id.is_some())
        {
            self.notifier.notify(record.key(), contact);
        }
    }

    /// Bindings of an AOR.
    ///
    /// With `including_domains`, bindings registered for the AOR's whole
    /// domain are merged in. With `recursive`, alias bindings are followed.
    pub async fn fetch(&self, aor: &str, including_domains: bool, recursive: bool) -> FetchOutcome {
        match aor.parse::<SipUri>() {
            Ok(uri) => self.fetch_uri(&uri, including_domains, recursive).await,
            Err(e) => FetchOutcome::Invalid(e.to_string()),
        }
    }

    pub async fn fetch_uri(&self, uri: &SipUri, including_domains: bool, recursive: bool) -> FetchOutcome {
        let now = Utc::now();

        if including_domains && uri.user().is_some() {
            let domain = uri.without_user();
            let mut aggregator =
                Aggregator::new(2, Record::for_uri(uri, self.config.use_global_domain));

            let (user_outcome, domain_outcome) = tokio::join!(
                self.fetch_one(uri, recursive, now),
                self.fetch_one(&domain, false, now)
            );

            aggregator.on_outcome(user_outcome);
            return aggregator.on_outcome(domain_outcome).unwrap_or_else(|| {
                FetchOutcome::Error(RegistrarError::Internal("aggregation incomplete".to_string()))
            });
        }

        self.fetch_one(uri, recursive, now).await
    }

    async fn fetch_one(&self, uri: &SipUri, recursive: bool, now: DateTime<Utc>) -> FetchOutcome {
        if recursive {
            RecursiveResolver::new(
                self.backend.as_ref(),
                self.config.use_global_domain,
                self.config.max_recursion_steps,
                now,
            )
            .resolve(uri)
            .await
        } else {
            self.backend.do_fetch(&self.key_for(uri), now).await
        }
    }

    /// Fetch several AORs concurrently; outcomes are in input order
    pub async fn fetch_list(&self, aors: &[&str]) -> Vec<FetchOutcome> {
        join_all(aors.iter().map(|aor| self.fetch(aor, false, false))).await
    }

    /// Remove every binding of an AOR.
    ///
    /// With a `cseq`, the clear is refused when a binding of the same
    /// dialog is newer (a delayed retransmission must not wipe a refresh).
    pub async fn clear(&self, aor: &str, call_id: &str, cseq: Option<u32>) -> FetchOutcome {
        let uri = match aor.parse::<SipUri>() {
            Ok(uri) => uri,
            Err(e) => return FetchOutcome::Invalid(e.to_string()),
        };
        let key = self.key_for(&uri);

        let outcome = self
            .backend
            .do_clear(&key, call_id, cseq.unwrap_or(UNSEQUENCED_CLEAR))
            .await;
        if matches!(outcome, FetchOutcome::NotFound) {
            self.local_expire.remove(&key);
            debug!("Cleared {}", key);
        }
        outcome
    }

    /// Be told when a device registers on `topic` (an AOR key)
    pub fn subscribe(&self, topic: &str, listener: Arc<dyn ContactRegisteredListener>) {
        self.notifier.subscribe(topic, listener);
    }

    pub fn unsubscribe(&self, topic: &str) -> bool {
        self.notifier.unsubscribe(topic)
    }

    /// Look up the binding of device `uid` under `key` and hand it to the
    /// listeners of that key. Returns how many listeners were called.
    pub async fn notify_contact_listener(&self, key: &str, uid: &str) -> usize {
        if !self.notifier.has_subscribers(key) {
            return 0;
        }

        match self.backend.do_fetch(key, Utc::now()).await {
            FetchOutcome::Found(record) => match record.find_by_unique_id(uid) {
                Some(contact) => self.notifier.notify(key, contact),
                None => {
                    debug!("No binding for device {} under {}", uid, key);
                    0
                }
            },
            FetchOutcome::Error(e) => {
                warn!("Could not load {} to notify {}: {}", key, uid, e);
                0
            }
            _ => 0,
        }
    }

    /// Entry point for registration messages published by other nodes
    pub async fn on_published(&self, topic: &str, message: &str) -> usize {
        self.notify_contact_listener(topic, message.trim()).await
    }

    /// AORs with a live binding through this node
    pub fn count_local_actives(&self) -> usize {
        self.local_expire.count_actives()
    }

    /// Garbage-collect expired local liveness entries and backend bindings
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let local = self.local_expire.remove_expired_before(now);
        let bindings = self.backend.purge_expired(now).await;
        if local > 0 || bindings > 0 {
            info!(
                "Expiry sweep removed {} local registrations and {} bindings",
                local, bindings
            );
        }
        bindings
    }

    /// Run [`purge_expired`](Self::purge_expired) every
    /// `expiry_check_interval` seconds until the sweeper is stopped
    pub fn start_expiry_sweeper(self: &Arc<Self>) -> ExpirySweeper {
        let interval = Duration::from_secs(self.config.expiry_check_interval.max(1));
        ExpirySweeper::spawn(self.clone(), interval)
    }
}
