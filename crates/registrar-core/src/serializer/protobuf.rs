//! Protocol Buffers encoding
//!
//! Messages are declared with `prost` attributes rather than generated from
//! a `.proto` file; tags must never be reused.

use prost::Message;

use super::{from_millis, RecordSerializer};
use crate::error::Result;
use crate::record::{ExtendedContact, Record};

#[derive(Clone, PartialEq, Message)]
struct RecordMessage {
    #[prost(string, tag = "1")]
    key: String,
    #[prost(bool, tag = "2")]
    is_domain: bool,
    #[prost(uint64, tag = "3")]
    version: u64,
    #[prost(message, repeated, tag = "4")]
    contacts: Vec<ContactMessage>,
}

#[derive(Clone, PartialEq, Message)]
struct ContactMessage {
    #[prost(string, tag = "1")]
    contact_id: String,
    #[prost(string, tag = "2")]
    call_id: String,
    #[prost(string, optional, tag = "3")]
    unique_id: Option<String>,
    #[prost(string, repeated, tag = "4")]
    path: Vec<String>,
    #[prost(string, tag = "5")]
    sip_uri: String,
    #[prost(float, tag = "6")]
    q: f32,
    #[prost(int64, tag = "7")]
    expire_at_ms: i64,
    #[prost(int64, tag = "8")]
    updated_time_ms: i64,
    #[prost(uint32, tag = "9")]
    cseq: u32,
    #[prost(bool, tag = "10")]
    alias: bool,
    #[prost(string, repeated, tag = "11")]
    accept_header: Vec<String>,
    #[prost(bool, tag = "12")]
    used_as_route: bool,
    #[prost(string, optional, tag = "13")]
    user_agent: Option<String>,
}

impl From<&ExtendedContact> for ContactMessage {
    fn from(contact: &ExtendedContact) -> Self {
        Self {
            contact_id: contact.contact_id.clone(),
            call_id: contact.call_id.clone(),
            unique_id: contact.unique_id.clone(),
            path: contact.path.clone(),
            sip_uri: contact.sip_uri.clone(),
            q: contact.q,
            expire_at_ms: contact.expire_at.timestamp_millis(),
            updated_time_ms: contact.updated_time.timestamp_millis(),
            cseq: contact.cseq,
            alias: contact.alias,
            accept_header: contact.accept_header.clone(),
            used_as_route: contact.used_as_route,
            user_agent: contact.user_agent.clone(),
        }
    }
}

impl ContactMessage {
    fn into_contact(self) -> Result<ExtendedContact> {
        Ok(ExtendedContact {
            contact_id: self.contact_id,
            call_id: self.call_id,
            unique_id: self.unique_id,
            path: self.path,
            sip_uri: self.sip_uri,
            q: self.q,
            expire_at: from_millis(self.expire_at_ms)?,
            updated_time: from_millis(self.updated_time_ms)?,
            cseq: self.cseq,
            alias: self.alias,
            accept_header: self.accept_header,
            used_as_route: self.used_as_route,
            user_agent: self.user_agent,
        })
    }
}

pub struct ProtobufSerializer;

impl RecordSerializer for ProtobufSerializer {
    fn name(&self) -> &'static str {
        "protobuf"
    }

    fn serialize(&self, record: &Record) -> Result<Vec<u8>> {
        let message = RecordMessage {
            key: record.key().to_string(),
            is_domain: record.is_domain(),
            version: record.version(),
            contacts: record.contacts().iter().map(ContactMessage::from).collect(),
        };
        Ok(message.encode_to_vec())
    }

    fn deserialize(&self, data: &[u8]) -> Result<Record> {
        let message = RecordMessage::decode(data)?;
        let contacts = message
            .contacts
            .into_iter()
            .map(ContactMessage::into_contact)
            .collect::<Result<Vec<_>>>()?;
        Ok(Record::from_parts(message.key, message.is_domain, message.version, contacts))
    }
}
