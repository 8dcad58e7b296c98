//! Configuration for the location service

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Where bindings are stored
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process record map, no persistence
    #[default]
    Internal,
    /// Remote key/value store, replies asynchronously
    Redis,
}

/// Encoding used by the remote backend to store a record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    C,
    Json,
    #[default]
    Protobuf,
    Msgpack,
}

/// Configuration for the registrar database
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistrarConfig {
    /// Storage backend
    pub backend: BackendKind,

    /// Record encoding for the remote backend
    pub serializer: SerializerKind,

    /// Maximum contacts per AOR
    pub max_contacts: usize,

    /// How many alias hops a recursive fetch may follow
    pub max_recursion_steps: u32,

    /// Merge all domains into a single key space (`user@merged`)
    pub use_global_domain: bool,

    /// Domain registrations are exclusive: a new one replaces the others
    pub assume_unique_domains: bool,

    /// Route URI of this node, used to decide which bindings are local
    pub preferred_route: Option<String>,

    /// Expiry sweep interval in seconds
    pub expiry_check_interval: u64,

    /// Key prefix in the remote store
    pub remote_key_prefix: String,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Internal,
            serializer: SerializerKind::Protobuf,
            max_contacts: 10,
            max_recursion_steps: 1,
            use_global_domain: false,
            assume_unique_domains: false,
            preferred_route: None,
            expiry_check_interval: 30, // Check every 30 seconds
            remote_key_prefix: "fs:".to_string(),
        }
    }
}

impl RegistrarConfig {
    /// Load configuration from an optional file, overridden by `REGISTRAR_*`
    /// environment variables (e.g. `REGISTRAR_MAX_CONTACTS=5`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder.add_source(Self::environment()).build()?;

        Ok(settings.try_deserialize()?)
    }

    /// `REGISTRAR_` prefix, `__` between nested keys
    fn environment() -> config::Environment {
        config::Environment::with_prefix("REGISTRAR")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    /// Settings consumed by record algorithms
    pub fn record_settings(&self) -> RecordSettings {
        RecordSettings {
            max_contacts: self.max_contacts,
            assume_unique_domains: self.assume_unique_domains,
        }
    }
}

/// The subset of configuration that record mutation depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSettings {
    pub max_contacts: usize,
    pub assume_unique_domains: bool,
}

impl Default for RecordSettings {
    fn default() -> Self {
        RegistrarConfig::default().record_settings()
    }
}
