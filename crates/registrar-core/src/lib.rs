//! # Registrar Core
//!
//! The location service of the rvoip SIP proxy: where REGISTER bindings are
//! stored and where call routing finds the devices of an address-of-record.
//!
//! This crate provides:
//! - Binding records with capacity-bounded eviction and de-duplication
//! - An async bind/fetch/clear protocol over pluggable storage backends
//! - Recursive alias resolution for late-forking targets
//! - Aggregation of user and domain registrations
//! - Local registration liveness tracking and background expiry
//!
//! ```no_run
//! use rvoip_registrar_core::{BindRequest, ContactSpec, RegistrarConfig, RegistrarDb};
//!
//! # async fn example() -> rvoip_registrar_core::Result<()> {
//! let db = RegistrarDb::internal(RegistrarConfig::default())?;
//!
//! let request = BindRequest::new("sip:alice@example.com", "a84b4c76e66710", 1, 3600)
//!     .with_contact(ContactSpec::new("sip:alice@192.0.2.4:5060"));
//! let outcome = db.bind(&request).await;
//! assert!(outcome.is_found());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod local_expire;
pub mod notify;
pub mod record;
pub mod registrar;
pub mod resolver;
pub mod serializer;
pub mod types;
pub mod uri;

// Re-exports for convenience
pub use backend::{KeyValueStore, MemoryBackend, MemoryKeyValueStore, RegistrarBackend, RemoteBackend};
pub use config::{BackendKind, RecordSettings, RegistrarConfig, SerializerKind};
pub use error::{RegistrarError, Result};
pub use local_expire::LocalRegExpire;
pub use notify::{ContactNotifier, ContactRegisteredListener};
pub use record::{ExtendedContact, Record};
pub use registrar::{ExpirySweeper, RegistrarDb};
pub use serializer::{RecordSerializer, serializer_for};
pub use types::{BindRequest, ContactSpec, FetchOutcome};
pub use uri::{Scheme, SipUri};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
