//! MessagePack encoding

use super::RecordSerializer;
use crate::error::Result;
use crate::record::Record;

pub struct MsgPackSerializer;

impl RecordSerializer for MsgPackSerializer {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn serialize(&self, record: &Record) -> Result<Vec<u8>> {
        // Named fields keep entries readable by other tools
        Ok(rmp_serde::to_vec_named(record)?)
    }

    fn deserialize(&self, data: &[u8]) -> Result<Record> {
        Ok(rmp_serde::from_slice(data)?)
    }
}
