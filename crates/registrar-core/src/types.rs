//! Request and result types of the location service

use serde::{Deserialize, Serialize};

use crate::error::RegistrarError;
use crate::record::Record;

/// One contact of a bind request, as extracted by the SIP layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContactSpec {
    /// Contact URI, or `*` to unregister every binding of the AOR
    pub uri: String,

    /// Contact-level expires parameter, overrides the request expire
    pub expires: Option<u32>,

    /// Preference weight (0.0 to 1.0)
    pub q: Option<f32>,

    /// `+sip.instance` contact parameter, if the device sent one
    pub instance_id: Option<String>,
}

impl ContactSpec {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            expires: None,
            q: None,
            instance_id: None,
        }
    }

    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_q(mut self, q: f32) -> Self {
        self.q = Some(q);
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// `Contact: *`
    pub fn is_wildcard(&self) -> bool {
        self.uri.trim() == "*"
    }

    /// Effective lifetime: contact expire if present, else the request's
    pub fn resolved_expire(&self, global_expire: u32) -> u32 {
        self.expires.unwrap_or(global_expire)
    }
}

/// Everything the location service needs from a REGISTER
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BindRequest {
    /// Address-of-record being registered (To URI)
    pub aor: String,

    /// Contacts to bind, refresh or remove
    pub contacts: Vec<ContactSpec>,

    pub call_id: String,

    pub cseq: u32,

    /// Path vector (RFC 3327), first hop first
    pub path: Vec<String>,

    /// Accept header values advertised by the device
    pub accept: Vec<String>,

    /// Expires header, used when a contact has no expires parameter
    pub global_expire: u32,

    /// Contacts are aliases to other AORs, not devices
    pub alias: bool,

    /// Contacts must be used as a Route, not as the request-URI
    pub used_as_route: bool,

    pub user_agent: Option<String>,
}

impl BindRequest {
    pub fn new(aor: impl Into<String>, call_id: impl Into<String>, cseq: u32, global_expire: u32) -> Self {
        Self {
            aor: aor.into(),
            contacts: Vec::new(),
            call_id: call_id.into(),
            cseq,
            path: Vec::new(),
            accept: Vec::new(),
            global_expire,
            alias: false,
            used_as_route: false,
            user_agent: None,
        }
    }

    pub fn with_contact(mut self, contact: ContactSpec) -> Self {
        self.contacts.push(contact);
        self
    }

    pub fn with_path(mut self, path: Vec<String>) -> Self {
        self.path = path;
        self
    }

    pub fn with_accept(mut self, accept: Vec<String>) -> Self {
        self.accept = accept;
        self
    }

    pub fn as_alias(mut self) -> Self {
        self.alias = true;
        self
    }

    pub fn as_route(mut self) -> Self {
        self.used_as_route = true;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Contacts that create or refresh a binding (resolved expire above 0)
    pub fn live_contact_count(&self) -> usize {
        self.contacts
            .iter()
            .filter(|c| !c.is_wildcard() && c.resolved_expire(self.global_expire) > 0)
            .count()
    }
}

/// Outcome of a bind, fetch or clear
#[derive(Debug)]
pub enum FetchOutcome {
    /// The record after the operation
    Found(Record),
    /// No binding for this AOR
    NotFound,
    /// The storage layer failed; the caller decides whether to retry
    Error(RegistrarError),
    /// The request was malformed or out of order
    Invalid(String),
}

impl FetchOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, FetchOutcome::Found(_))
    }

    pub fn record(&self) -> Option<&Record> {
        match self {
            FetchOutcome::Found(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            FetchOutcome::Found(record) => Some(record),
            _ => None,
        }
    }

    /// `Found` when the record has contacts, `NotFound` otherwise
    pub fn from_record(record: Option<Record>) -> Self {
        match record {
            Some(record) if !record.is_empty() => FetchOutcome::Found(record),
            _ => FetchOutcome::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_contact_count_ignores_removals() {
        let request = BindRequest::new("sip:alice@example.com", "call-1", 1, 3600)
            .with_contact(ContactSpec::new("sip:alice@10.0.0.1"))
            .with_contact(ContactSpec::new("sip:alice@10.0.0.2").with_expires(0))
            .with_contact(ContactSpec::new("sip:alice@10.0.0.3").with_expires(60));
        assert_eq!(request.live_contact_count(), 2);

        let unregister_all = BindRequest::new("sip:alice@example.com", "call-1", 2, 0)
            .with_contact(ContactSpec::new("*"));
        assert_eq!(unregister_all.live_contact_count(), 0);
    }
}
