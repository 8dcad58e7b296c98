//! Record encodings for the remote store
//!
//! The in-memory algorithms never see these bytes; only
//! [`RemoteBackend`](crate::backend::RemoteBackend) does.

use chrono::{DateTime, TimeZone, Utc};

use crate::config::SerializerKind;
use crate::error::{RegistrarError, Result};
use crate::record::Record;

pub mod compact;
pub mod json;
pub mod msgpack;
pub mod protobuf;

pub use compact::CompactSerializer;
pub use json::JsonSerializer;
pub use msgpack::MsgPackSerializer;
pub use protobuf::ProtobufSerializer;

/// Encodes a record to bytes and back
pub trait RecordSerializer: Send + Sync {
    fn name(&self) -> &'static str;

    fn serialize(&self, record: &Record) -> Result<Vec<u8>>;

    fn deserialize(&self, data: &[u8]) -> Result<Record>;
}

/// Serializer for a configured kind
pub fn serializer_for(kind: SerializerKind) -> Box<dyn RecordSerializer> {
    match kind {
        SerializerKind::C => Box::new(CompactSerializer),
        SerializerKind::Json => Box::new(JsonSerializer),
        SerializerKind::Protobuf => Box::new(ProtobufSerializer),
        SerializerKind::Msgpack => Box::new(MsgPackSerializer),
    }
}

/// Millisecond timestamps for the formats without a native date type
pub(crate) fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| RegistrarError::Serialization(format!("timestamp out of range: {}", millis)))
}
