//! JSON encoding

use super::RecordSerializer;
use crate::error::Result;
use crate::record::Record;

pub struct JsonSerializer;

impl RecordSerializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, record: &Record) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(record)?)
    }

    fn deserialize(&self, data: &[u8]) -> Result<Record> {
        Ok(serde_json::from_slice(data)?)
    }
}
