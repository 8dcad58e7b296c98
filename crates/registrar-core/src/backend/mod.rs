//! Storage backends
//!
//! A backend decides where records live. Everything that is not storage
//! (validation, alias resolution, aggregation, local liveness) is done by
//! [`RegistrarDb`](crate::registrar::RegistrarDb) on top of this trait, and
//! record mutation goes through [`Record::apply_bind`](crate::record::Record::apply_bind),
//! so both backends behave identically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RegistrarError;
use crate::types::{BindRequest, FetchOutcome};

pub mod memory;
pub mod remote;

pub use memory::MemoryBackend;
pub use remote::{KeyValueStore, MemoryKeyValueStore, RemoteBackend};

/// Storage location of binding records
#[async_trait]
pub trait RegistrarBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Apply a bind request to the record stored under `key`, creating it
    /// if needed. Returns the record as stored, or `NotFound` if the request
    /// left it empty.
    async fn do_bind(
        &self,
        key: &str,
        is_domain: bool,
        request: &BindRequest,
        now: DateTime<Utc>,
    ) -> FetchOutcome;

    /// Load the record stored under `key`, without its expired bindings
    async fn do_fetch(&self, key: &str, now: DateTime<Utc>) -> FetchOutcome;

    /// Remove the record stored under `key` unless a binding of the same
    /// dialog has a higher cseq. Returns `NotFound` once removed.
    async fn do_clear(&self, key: &str, call_id: &str, cseq: u32) -> FetchOutcome;

    /// Drop expired bindings; returns how many were removed
    async fn purge_expired(&self, _now: DateTime<Utc>) -> usize {
        0
    }
}

/// Map an error raised while applying a request to the outcome the caller sees
pub(crate) fn outcome_from_error(err: RegistrarError) -> FetchOutcome {
    match err {
        RegistrarError::InvalidRequest(reason) => FetchOutcome::Invalid(reason),
        RegistrarError::InvalidUri(uri) => FetchOutcome::Invalid(format!("invalid URI {}", uri)),
        other => FetchOutcome::Error(other),
    }
}
