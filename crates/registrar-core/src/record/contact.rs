//! A single device binding

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RegistrarError, Result};
use crate::types::{BindRequest, ContactSpec};
use crate::uri::SipUri;

/// One binding of an AOR to a reachable contact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtendedContact {
    /// transport:user@host:port of the contact, identifies the endpoint
    pub contact_id: String,

    /// Call-ID of the REGISTER that created or refreshed this binding
    pub call_id: String,

    /// Device instance identifier (`+sip.instance` or `line` parameter)
    pub unique_id: Option<String>,

    /// Proxies to traverse to reach the device, first hop first
    pub path: Vec<String>,

    /// Contact URI
    pub sip_uri: String,

    /// Preference weight (0.0 to 1.0, higher is preferred)
    pub q: f32,

    /// When this binding expires
    pub expire_at: DateTime<Utc>,

    /// When this binding was last refreshed
    pub updated_time: DateTime<Utc>,

    pub cseq: u32,

    /// The contact designates another AOR rather than a device
    pub alias: bool,

    pub accept_header: Vec<String>,

    /// The contact is a Route toward the target, not the target itself
    pub used_as_route: bool,

    pub user_agent: Option<String>,
}

impl ExtendedContact {
    /// Create a binding refreshed at `updated_time` for `expire` seconds.
    ///
    /// Times are kept at millisecond precision, the finest every record
    /// encoding stores.
    pub fn new(
        sip_uri: &str,
        call_id: &str,
        cseq: u32,
        updated_time: DateTime<Utc>,
        expire: u32,
    ) -> Result<Self> {
        let uri: SipUri = sip_uri.parse()?;
        if expire == 0 {
            return Err(RegistrarError::InvalidRequest(format!(
                "zero expire for {} does not create a binding",
                sip_uri
            )));
        }

        let updated_time = truncate_to_millis(updated_time);
        Ok(Self {
            contact_id: Self::contact_id_of(&uri),
            call_id: call_id.to_string(),
            unique_id: uri.param("line").filter(|l| !l.is_empty()).map(str::to_string),
            path: Vec::new(),
            sip_uri: uri.to_string(),
            q: 1.0,
            expire_at: updated_time + Duration::seconds(i64::from(expire)),
            updated_time,
            cseq,
            alias: false,
            accept_header: Vec::new(),
            used_as_route: false,
            user_agent: None,
        })
    }

    /// Build the binding for one contact of a bind request.
    ///
    /// Returns `Ok(None)` when the resolved expire is 0: that contact
    /// unregisters and must not produce a binding.
    pub fn from_bind(
        spec: &ContactSpec,
        request: &BindRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>> {
        let expire = spec.resolved_expire(request.global_expire);
        if expire == 0 {
            return Ok(None);
        }

        let mut contact = Self::new(&spec.uri, &request.call_id, request.cseq, now, expire)?;
        if let Some(instance) = spec.instance_id.as_deref().map(normalize_instance) {
            if !instance.is_empty() {
                contact.unique_id = Some(instance);
            }
        }
        contact.q = spec.q.unwrap_or(1.0).clamp(0.0, 1.0);
        contact.path = request.path.clone();
        contact.alias = request.alias;
        contact.used_as_route = request.used_as_route;
        contact.accept_header = request.accept.clone();
        contact.user_agent = request.user_agent.clone();

        Ok(Some(contact))
    }

    /// Endpoint identity: transport, user, host and port
    pub fn contact_id_of(uri: &SipUri) -> String {
        format!(
            "{}:{}@{}:{}",
            uri.transport(),
            uri.user().unwrap_or(""),
            uri.host(),
            uri.port_or_default()
        )
    }

    pub fn uri(&self) -> Result<SipUri> {
        self.sip_uri.parse()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at <= now
    }

    /// Remaining lifetime in seconds, 0 once expired
    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        (self.expire_at - now).num_seconds().max(0)
    }

    /// Whether the first hop of the path is `route`
    pub fn is_routed_through(&self, route: &SipUri) -> bool {
        self.path
            .first()
            .and_then(|hop| hop.parse::<SipUri>().ok())
            .is_some_and(|hop| hop.same_address(route))
    }

    /// Rewrite a route-only binding so the final target stays `target`
    /// while the request still physically goes through this contact.
    pub fn routed_to(&self, target: &SipUri) -> Self {
        let mut contact = self.clone();
        contact.path.insert(0, self.sip_uri.clone());
        contact.sip_uri = target.to_string();
        contact
    }
}

fn truncate_to_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = time.nanosecond();
    time.with_nanosecond(nanos - nanos % 1_000_000).unwrap_or(time)
}

pub(crate) fn normalize_instance(instance: &str) -> String {
    instance
        .trim()
        .trim_matches('"')
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}
