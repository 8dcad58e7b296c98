//! Compact text encoding (`c`)
//!
//! One header followed by one entry per contact. Entries are separated by
//! RS (0x1e), fields by US (0x1f) and list items by GS (0x1d); none of those
//! can appear in a SIP URI or header value, and serialization refuses values
//! that contain them.
//!
//! ```text
//! key US is_domain US version
//! RS contact_id US call_id US unique_id US path US sip_uri US q US expire_ms
//!    US updated_ms US cseq US alias US accept US used_as_route US user_agent
//! ```

use super::{from_millis, RecordSerializer};
use crate::error::{RegistrarError, Result};
use crate::record::{ExtendedContact, Record};

const RECORD_SEPARATOR: char = '\u{1e}';
const FIELD_SEPARATOR: char = '\u{1f}';
const LIST_SEPARATOR: char = '\u{1d}';

const CONTACT_FIELDS: usize = 13;

pub struct CompactSerializer;

impl RecordSerializer for CompactSerializer {
    fn name(&self) -> &'static str {
        "c"
    }

    fn serialize(&self, record: &Record) -> Result<Vec<u8>> {
        let mut out = String::new();
        out.push_str(&checked(record.key())?);
        out.push(FIELD_SEPARATOR);
        out.push_str(flag(record.is_domain()));
        out.push(FIELD_SEPARATOR);
        out.push_str(&record.version().to_string());

        for contact in record.contacts() {
            out.push(RECORD_SEPARATOR);
            let fields = [
                checked(&contact.contact_id)?,
                checked(&contact.call_id)?,
                checked(contact.unique_id.as_deref().unwrap_or(""))?,
                list(&contact.path)?,
                checked(&contact.sip_uri)?,
                contact.q.to_string(),
                contact.expire_at.timestamp_millis().to_string(),
                contact.updated_time.timestamp_millis().to_string(),
                contact.cseq.to_string(),
                flag(contact.alias).to_string(),
                list(&contact.accept_header)?,
                flag(contact.used_as_route).to_string(),
                checked(contact.user_agent.as_deref().unwrap_or(""))?,
            ];
            out.push_str(&fields.join(&FIELD_SEPARATOR.to_string()));
        }

        Ok(out.into_bytes())
    }

    fn deserialize(&self, data: &[u8]) -> Result<Record> {
        let text = std::str::from_utf8(data)
            .map_err(|e| RegistrarError::Serialization(format!("compact record is not UTF-8: {}", e)))?;

        let mut entries = text.split(RECORD_SEPARATOR);
        let header: Vec<&str> = entries.next().unwrap_or("").split(FIELD_SEPARATOR).collect();
        let [key, is_domain, version] = header[..] else {
            return Err(malformed("header"));
        };
        if key.is_empty() {
            return Err(malformed("empty key"));
        }

        let contacts = entries.map(parse_contact).collect::<Result<Vec<_>>>()?;

        Ok(Record::from_parts(
            key.to_string(),
            parse_flag(is_domain)?,
            version.parse().map_err(|_| malformed("version"))?,
            contacts,
        ))
    }
}

fn parse_contact(entry: &str) -> Result<ExtendedContact> {
    let fields: Vec<&str> = entry.split(FIELD_SEPARATOR).collect();
    if fields.len() != CONTACT_FIELDS {
        return Err(malformed("contact field count"));
    }

    Ok(ExtendedContact {
        contact_id: fields[0].to_string(),
        call_id: fields[1].to_string(),
        unique_id: optional(fields[2]),
        path: parse_list(fields[3]),
        sip_uri: fields[4].to_string(),
        q: fields[5].parse().map_err(|_| malformed("q"))?,
        expire_at: from_millis(fields[6].parse().map_err(|_| malformed("expire"))?)?,
        updated_time: from_millis(fields[7].parse().map_err(|_| malformed("updated time"))?)?,
        cseq: fields[8].parse().map_err(|_| malformed("cseq"))?,
        alias: parse_flag(fields[9])?,
        accept_header: parse_list(fields[10]),
        used_as_route: parse_flag(fields[11])?,
        user_agent: optional(fields[12]),
    })
}

fn checked(value: &str) -> Result<String> {
    if value
        .chars()
        .any(|c| c == RECORD_SEPARATOR || c == FIELD_SEPARATOR || c == LIST_SEPARATOR)
    {
        return Err(RegistrarError::Serialization(format!(
            "value {:?} contains a reserved separator",
            value
        )));
    }
    Ok(value.to_string())
}

fn list(values: &[String]) -> Result<String> {
    let items = values.iter().map(|v| checked(v)).collect::<Result<Vec<_>>>()?;
    Ok(items.join(&LIST_SEPARATOR.to_string()))
}

fn parse_list(field: &str) -> Vec<String> {
    if field.is_empty() {
        Vec::new()
    } else {
        field.split(LIST_SEPARATOR).map(str::to_string).collect()
    }
}

fn optional(field: &str) -> Option<String> {
    (!field.is_empty()).then(|| field.to_string())
}

fn flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

fn parse_flag(field: &str) -> Result<bool> {
    match field {
        "1" => Ok(true),
        "0" => Ok(false),
        _ => Err(malformed("flag")),
    }
}

fn malformed(what: &str) -> RegistrarError {
    RegistrarError::Serialization(format!("malformed compact record: {}", what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordSettings;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_lists_and_optional_fields_survive() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut contact = ExtendedContact::new("sip:alice@10.0.0.1;transport=tcp", "c1", 3, now, 60).unwrap();
        contact.path = vec!["sip:edge1.example.com;lr".to_string(), "sip:core.example.com;lr".to_string()];
        contact.accept_header = vec!["application/sdp".to_string()];
        contact.used_as_route = true;

        let mut record = Record::new("alice@example.com", false);
        record.insert_or_update_binding(contact, &RecordSettings::default());

        let data = CompactSerializer.serialize(&record).unwrap();
        let decoded = CompactSerializer.deserialize(&data).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.contacts()[0].unique_id, None);
        assert_eq!(decoded.contacts()[0].path.len(), 2);
    }

    #[test]
    fn test_reserved_separator_is_refused() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut contact = ExtendedContact::new("sip:alice@10.0.0.1", "c1", 1, now, 60).unwrap();
        contact.user_agent = Some("evil\u{1f}agent".to_string());
        let mut record = Record::new("alice@example.com", false);
        record.insert_or_update_binding(contact, &RecordSettings::default());

        assert!(matches!(
            CompactSerializer.serialize(&record),
            Err(RegistrarError::Serialization(_))
        ));
    }

    #[test]
    fn test_truncated_input_is_refused() {
        assert!(CompactSerializer.deserialize(b"alice@example.com").is_err());
        assert!(CompactSerializer.deserialize(b"").is_err());
    }
}
