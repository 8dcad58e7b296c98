//! # SIP URI handling for location keys
//!
//! The location service never parses full SIP messages; it only needs the
//! components of an AOR or contact URI that identify a binding:
//!
//! ```text
//! sip:user:password@host:port;uri-parameters?headers
//! ```
//!
//! Password and headers are accepted and dropped. Parameters are kept in
//! order so that `transport`, `line` and similar can be looked up.
//!
//! ```
//! use rvoip_registrar_core::uri::SipUri;
//!
//! let uri: SipUri = "<sip:alice@Example.com:5070;transport=TCP>".parse().unwrap();
//! assert_eq!(uri.user(), Some("alice"));
//! assert_eq!(uri.host(), "example.com");
//! assert_eq!(uri.transport(), "tcp");
//! assert_eq!(uri.to_string(), "sip:alice@example.com:5070;transport=TCP");
//! ```

use std::fmt;
use std::str::FromStr;

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while, take_while1},
    character::complete::{char, digit1},
    combinator::{all_consuming, map, map_res, opt, recognize, rest},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};
use serde::{Deserialize, Serialize};

use crate::error::{RegistrarError, Result};

/// URI scheme accepted by the location service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    Sip,
    Sips,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Sip => "sip",
            Scheme::Sips => "sips",
        }
    }

    /// Port used when the URI carries none
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Sip => 5060,
            Scheme::Sips => 5061,
        }
    }
}

/// A parsed SIP or SIPS URI
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SipUri {
    scheme: Scheme,
    user: Option<String>,
    host: String,
    port: Option<u16>,
    params: Vec<(String, Option<String>)>,
}

impl SipUri {
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Port, or the scheme default
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or_else(|| self.scheme.default_port())
    }

    /// Value of a URI parameter; `Some("")` for a flag parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    /// Lowercased transport parameter, `udp` (or `tls` for sips) when absent
    pub fn transport(&self) -> String {
        match self.param("transport") {
            Some(t) if !t.is_empty() => t.to_ascii_lowercase(),
            _ => match self.scheme {
                Scheme::Sip => "udp".to_string(),
                Scheme::Sips => "tls".to_string(),
            },
        }
    }

    /// The same URI with the user part removed, used for domain lookups
    pub fn without_user(&self) -> Self {
        Self {
            user: None,
            ..self.clone()
        }
    }

    /// Whether both URIs reach the same user at the same address,
    /// parameters aside
    pub fn same_address(&self, other: &SipUri) -> bool {
        self.scheme == other.scheme
            && self.user == other.user
            && self.host == other.host
            && self.port_or_default() == other.port_or_default()
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme.as_str())?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        for (name, value) in &self.params {
            match value {
                Some(value) => write!(f, ";{}={}", name, value)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}

impl FromStr for SipUri {
    type Err = RegistrarError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .unwrap_or(trimmed);

        all_consuming(sip_uri)(inner)
            .map(|(_, uri)| uri)
            .map_err(|_| RegistrarError::InvalidUri(s.to_string()))
    }
}

fn scheme(input: &str) -> IResult<&str, Scheme> {
    alt((
        map(tag_no_case("sips:"), |_| Scheme::Sips),
        map(tag_no_case("sip:"), |_| Scheme::Sip),
    ))(input)
}

fn userinfo(input: &str) -> IResult<&str, &str> {
    terminated(
        take_while1(|c: char| c != '@' && c != ';' && c != '?' && !c.is_whitespace()),
        char('@'),
    )(input)
}

fn host(input: &str) -> IResult<&str, String> {
    alt((
        map(
            recognize(delimited(char('['), take_while1(|c: char| c != ']'), char(']'))),
            |h: &str| h.to_ascii_lowercase(),
        ),
        map(
            take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_'),
            |h: &str| h.to_ascii_lowercase(),
        ),
    ))(input)
}

fn port(input: &str) -> IResult<&str, u16> {
    preceded(char(':'), map_res(digit1, |d: &str| d.parse::<u16>()))(input)
}

fn param(input: &str) -> IResult<&str, (String, Option<String>)> {
    map(
        preceded(
            char(';'),
            pair(
                take_while1(|c: char| c != '=' && c != ';' && c != '?'),
                opt(preceded(char('='), take_while(|c: char| c != ';' && c != '?'))),
            ),
        ),
        |(name, value): (&str, Option<&str>)| (name.to_string(), value.map(str::to_string)),
    )(input)
}

fn sip_uri(input: &str) -> IResult<&str, SipUri> {
    let (input, scheme) = scheme(input)?;
    let (input, userinfo) = opt(userinfo)(input)?;
    let (input, host) = host(input)?;
    let (input, port) = opt(port)(input)?;
    let (input, params) = many0(param)(input)?;
    let (input, _headers) = opt(preceded(char('?'), rest))(input)?;

    // user:password, the password is deprecated and never stored
    let user = userinfo
        .and_then(|u| u.split(':').next())
        .filter(|u| !u.is_empty())
        .map(str::to_string);

    Ok((
        input,
        SipUri {
            scheme,
            user,
            host,
            port,
            params,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_uri() {
        let uri: SipUri = "sip:bob:secret@10.0.0.1:5080;transport=tcp;lr?subject=x"
            .parse()
            .unwrap();
        assert_eq!(uri.scheme(), Scheme::Sip);
        assert_eq!(uri.user(), Some("bob"));
        assert_eq!(uri.host(), "10.0.0.1");
        assert_eq!(uri.port(), Some(5080));
        assert_eq!(uri.param("transport"), Some("tcp"));
        assert_eq!(uri.param("lr"), Some(""));
        assert_eq!(uri.param("maddr"), None);
    }

    #[test]
    fn test_parse_domain_only_and_ipv6() {
        let uri: SipUri = "sips:Example.ORG".parse().unwrap();
        assert_eq!(uri.user(), None);
        assert_eq!(uri.host(), "example.org");
        assert_eq!(uri.port_or_default(), 5061);
        assert_eq!(uri.transport(), "tls");

        let uri: SipUri = "sip:carol@[2001:db8::1]:5060".parse().unwrap();
        assert_eq!(uri.host(), "[2001:db8::1]");
        assert_eq!(uri.port(), Some(5060));
    }

    #[test]
    fn test_reject_garbage() {
        assert!("".parse::<SipUri>().is_err());
        assert!("tel:+123456".parse::<SipUri>().is_err());
        assert!("sip:".parse::<SipUri>().is_err());
        assert!("sip:alice@".parse::<SipUri>().is_err());
        assert!("sip:alice@host:notaport".parse::<SipUri>().is_err());
    }

    #[test]
    fn test_without_user_and_same_address() {
        let uri: SipUri = "sip:alice@example.com;transport=udp".parse().unwrap();
        assert_eq!(uri.without_user().to_string(), "sip:example.com;transport=udp");

        let a: SipUri = "sip:proxy.example.com;lr".parse().unwrap();
        let b: SipUri = "sip:proxy.example.com:5060".parse().unwrap();
        assert!(a.same_address(&b));
    }
}
