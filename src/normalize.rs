use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Gig, OrganizationType, ZipCode};

pub type RawRecord = Map<String, Value>;

pub const DEFAULT_INSTRUMENTS: [&str; 4] = ["Guitar", "Organ", "Piano", "Voice"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed gig record: {field}: {reason}")]
pub struct MalformedRecordError {
    pub field: &'static str,
    pub reason: String,
}

impl MalformedRecordError {
    fn missing(field: &'static str) -> Self {
        Self {
            field,
            reason: "missing".to_string(),
        }
    }

    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Where a canonical field may be found in a raw document.
#[derive(Debug, Clone, Copy)]
enum Source {
    Key(&'static str),
    /// A key on the first document of a relationship attribute.
    Related(&'static str, &'static str),
    /// The relationship attribute itself: a bare id string or a document's `$id`.
    RelatedId(&'static str),
}

use Source::{Key, Related, RelatedId};

const ID: &[Source] = &[Key("$id"), Key("id")];
const TITLE: &[Source] = &[Key("title"), Key("Title"), Key("Name")];
const DESCRIPTION: &[Source] = &[Key("description"), Key("Description")];
const PAY: &[Source] = &[
    Key("pay"),
    Key("Pay"),
    Key("Compensation"),
    Key("compensation"),
];
const INSTRUMENT: &[Source] = &[Key("instrument"), Key("Instrument"), Key("Instruments")];
const ORGANIZATION_TYPE: &[Source] = &[Key("type"), Key("Type"), Key("organizationType")];
const EVENT_AT: &[Source] = &[Key("eventDateTime"), Key("date"), Key("Date")];
const POSTED_AT: &[Source] = &[Key("postedAt"), Key("$createdAt")];
const ZIP: &[Source] = &[
    Key("zip"),
    Key("Zip"),
    Key("locationZip"),
    Related("churchId", "Zip"),
    Related("churchId", "zip"),
];
const ORGANIZER_ID: &[Source] = &[
    Key("organizerId"),
    Key("churchIdStr"),
    RelatedId("churchId"),
];
const CREATED_BY: &[Source] = &[Key("createdBy"), Key("createdByName")];
const ACCEPTED_BY: &[Source] = &[Key("acceptedBy")];

/// Maps raw store documents onto canonical [`Gig`]s.
#[derive(Debug, Clone)]
pub struct Normalizer {
    instrument_vocabulary: Vec<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_INSTRUMENTS.iter().map(|name| name.to_string()).collect())
    }
}

impl Normalizer {
    pub fn new(instrument_vocabulary: Vec<String>) -> Self {
        Self {
            instrument_vocabulary,
        }
    }

    pub fn normalize(&self, raw: &RawRecord) -> Result<Gig, MalformedRecordError> {
        let id = required_text(raw, "id", ID)?;
        let title = required_text(raw, "title", TITLE)?;
        let description = optional_text(raw, "description", DESCRIPTION)?.unwrap_or_default();
        let pay_amount = match resolve(raw, PAY) {
            Some(value) => parse_pay(value)?,
            None => return Err(MalformedRecordError::missing("pay_amount")),
        };
        let instrument = optional_text(raw, "instrument", INSTRUMENT)?
            .map(|text| self.canonical_instrument(text))
            .unwrap_or_default();
        let organization_type = match optional_text(raw, "organization_type", ORGANIZATION_TYPE)? {
            Some(tag) => tag.parse::<OrganizationType>().unwrap_or_else(|unknown| {
                warn!(gig = %id, tag = %unknown, "unrecognized organization type, using Other");
                OrganizationType::Other
            }),
            None => {
                warn!(gig = %id, "gig has no organization type, using Other");
                OrganizationType::Other
            }
        };
        let event_at = optional_timestamp(raw, "event_at", EVENT_AT)?;
        let posted_at = optional_timestamp(raw, "posted_at", POSTED_AT)?;
        let location_zip = match resolve(raw, ZIP) {
            Some(value) => parse_zip(value)?,
            None => return Err(MalformedRecordError::missing("location_zip")),
        };
        let organizer_id = required_text(raw, "organizer_id", ORGANIZER_ID)?;
        let created_by_name = optional_text(raw, "created_by_name", CREATED_BY)?.unwrap_or_default();
        let accepted_by = optional_text(raw, "accepted_by", ACCEPTED_BY)?;

        Ok(Gig {
            id,
            title,
            description,
            pay_amount,
            instrument,
            organization_type,
            event_at,
            posted_at,
            location_zip,
            organizer_id,
            created_by_name,
            accepted_by,
        })
    }

    fn canonical_instrument(&self, text: String) -> String {
        match self
            .instrument_vocabulary
            .iter()
            .find(|known| known.eq_ignore_ascii_case(&text))
        {
            Some(known) => known.clone(),
            None => {
                debug!(instrument = %text, "instrument outside known vocabulary");
                text
            }
        }
    }
}

pub fn clean_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn resolve<'a>(raw: &'a RawRecord, sources: &[Source]) -> Option<&'a Value> {
    sources
        .iter()
        .filter_map(|source| lookup(raw, *source))
        .find(|value| is_present(value))
}

fn lookup(raw: &RawRecord, source: Source) -> Option<&Value> {
    match source {
        Key(key) => raw.get(key),
        Related(relation, key) => first_related(raw.get(relation)?)?.get(key),
        RelatedId(relation) => match first_related(raw.get(relation)?)? {
            Value::Object(document) => document.get("$id"),
            other => Some(other),
        },
    }
}

fn first_related(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.first(),
        Value::Null => None,
        other => Some(other),
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

fn text_of(field: &'static str, value: &Value) -> Result<String, MalformedRecordError> {
    match value {
        Value::String(text) => Ok(clean_text(text)),
        Value::Number(number) => Ok(number.to_string()),
        Value::Array(items) => {
            let parts = items
                .iter()
                .map(|item| text_of(field, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(parts
                .into_iter()
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(", "))
        }
        other => Err(MalformedRecordError::invalid(
            field,
            format!("expected text, found {other}"),
        )),
    }
}

fn required_text(
    raw: &RawRecord,
    field: &'static str,
    sources: &[Source],
) -> Result<String, MalformedRecordError> {
    optional_text(raw, field, sources)?
        .filter(|text| !text.is_empty())
        .ok_or_else(|| MalformedRecordError::missing(field))
}

fn optional_text(
    raw: &RawRecord,
    field: &'static str,
    sources: &[Source],
) -> Result<Option<String>, MalformedRecordError> {
    match resolve(raw, sources) {
        Some(value) => {
            let text = text_of(field, value)?;
            Ok(if text.is_empty() { None } else { Some(text) })
        }
        None => Ok(None),
    }
}

fn optional_timestamp(
    raw: &RawRecord,
    field: &'static str,
    sources: &[Source],
) -> Result<Option<DateTime<Utc>>, MalformedRecordError> {
    let Some(value) = resolve(raw, sources) else {
        return Ok(None);
    };
    let text = value
        .as_str()
        .ok_or_else(|| MalformedRecordError::invalid(field, format!("expected timestamp, found {value}")))?;
    DateTime::parse_from_rfc3339(text.trim())
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|err| MalformedRecordError::invalid(field, format!("{text}: {err}")))
}

fn parse_pay(value: &Value) -> Result<u32, MalformedRecordError> {
    const FIELD: &str = "pay_amount";
    let amount = match value {
        Value::Number(number) => whole_number(number)
            .ok_or_else(|| MalformedRecordError::invalid(FIELD, format!("not a whole non-negative amount: {number}")))?,
        Value::String(text) => {
            let trimmed = text.trim();
            let digits = trimmed.strip_prefix('$').unwrap_or(trimmed).replace(',', "");
            digits.trim().parse::<u64>().map_err(|_| {
                MalformedRecordError::invalid(FIELD, format!("not a whole non-negative amount: {trimmed}"))
            })?
        }
        other => {
            return Err(MalformedRecordError::invalid(
                FIELD,
                format!("expected number, found {other}"),
            ))
        }
    };
    u32::try_from(amount).map_err(|_| MalformedRecordError::invalid(FIELD, format!("out of range: {amount}")))
}

fn parse_zip(value: &Value) -> Result<ZipCode, MalformedRecordError> {
    const FIELD: &str = "location_zip";
    let zip = match value {
        Value::Number(number) => whole_number(number).and_then(ZipCode::from_number),
        Value::String(text) => ZipCode::parse(text).or_else(|| short_zip(text.trim())),
        _ => None,
    };
    zip.ok_or_else(|| MalformedRecordError::invalid(FIELD, format!("not a postal code: {value}")))
}

/// `parseInt` drops leading zeros, so "2134" is the stored form of 02134.
fn short_zip(text: &str) -> Option<ZipCode> {
    if text.is_empty() || text.len() > 4 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok().and_then(ZipCode::from_number)
}

fn whole_number(number: &serde_json::Number) -> Option<u64> {
    if let Some(value) = number.as_u64() {
        return Some(value);
    }
    number
        .as_f64()
        .filter(|value| *value >= 0.0 && value.fract() == 0.0 && *value <= u64::MAX as f64)
        .map(|value| value as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("record fixture must be an object"),
        }
    }

    fn base() -> Value {
        json!({
            "$id": "gig-1",
            "$createdAt": "2025-05-20T14:03:11.000+00:00",
            "title": "Sunday Service Organist",
            "description": "Two services, hymns provided",
            "pay": 150,
            "Instrument": "organ",
            "type": "Church",
            "date": "2025-06-01T15:00:00.000Z",
            "zip": 12180,
            "churchIdStr": "church-7",
            "createdBy": "Jane Doe"
        })
    }

    #[test]
    fn normalizes_home_screen_document() {
        let gig = Normalizer::default().normalize(&record(base())).expect("normalize");
        assert_eq!(gig.id, "gig-1");
        assert_eq!(gig.title, "Sunday Service Organist");
        assert_eq!(gig.pay_amount, 150);
        assert_eq!(gig.instrument, "Organ");
        assert_eq!(gig.organization_type, OrganizationType::Church);
        assert_eq!(gig.location_zip.as_str(), "12180");
        assert_eq!(gig.organizer_id, "church-7");
        assert_eq!(gig.created_by_name, "Jane Doe");
        assert!(gig.event_at.is_some());
        assert!(gig.posted_at.is_some());
        assert!(gig.is_open());
    }

    #[test]
    fn aliases_resolve_to_same_canonical_values() {
        let normalizer = Normalizer::default();
        let lower = normalizer.normalize(&record(base())).expect("lower");

        let mut upper = record(base());
        for (from, to) in [
            ("title", "Title"),
            ("pay", "Compensation"),
            ("Instrument", "instrument"),
            ("type", "Type"),
            ("zip", "Zip"),
        ] {
            let value = upper.remove(from).expect("fixture key");
            upper.insert(to.to_string(), value);
        }
        upper.insert("Compensation".into(), json!("150"));
        upper.insert("Zip".into(), json!("12180"));
        let upper = normalizer.normalize(&upper).expect("upper");

        let mut named = record(base());
        let title = named.remove("title").expect("title");
        named.insert("Name".into(), title);
        let named = normalizer.normalize(&named).expect("named");

        assert_eq!(lower, upper);
        assert_eq!(lower, named);
    }

    #[test]
    fn alias_priority_prefers_earlier_keys() {
        let mut raw = record(base());
        raw.insert("Title".into(), json!("Ignored"));
        raw.insert("title".into(), json!("  Preferred   Title "));
        let gig = Normalizer::default().normalize(&raw).expect("normalize");
        assert_eq!(gig.title, "Preferred Title");

        let mut blank = record(base());
        blank.insert("title".into(), json!(""));
        blank.insert("Title".into(), json!("Fallback"));
        let gig = Normalizer::default().normalize(&blank).expect("normalize");
        assert_eq!(gig.title, "Fallback");
    }

    #[test]
    fn zip_and_organizer_fall_back_to_related_church() {
        let mut raw = record(base());
        raw.remove("zip");
        raw.remove("churchIdStr");
        raw.insert(
            "churchId".into(),
            json!([{ "$id": "church-9", "Name": "St. Luke's", "Zip": "02134" }]),
        );
        let gig = Normalizer::default().normalize(&raw).expect("normalize");
        assert_eq!(gig.location_zip.as_str(), "02134");
        assert_eq!(gig.organizer_id, "church-9");

        raw.insert("churchId".into(), json!(["church-10"]));
        raw.insert("zip".into(), json!("12182"));
        let gig = Normalizer::default().normalize(&raw).expect("normalize");
        assert_eq!(gig.organizer_id, "church-10");
    }

    #[test]
    fn non_numeric_pay_is_malformed_not_zero() {
        let mut raw = record(base());
        raw.insert("pay".into(), json!("negotiable"));
        let err = Normalizer::default().normalize(&raw).expect_err("should fail");
        assert_eq!(err.field, "pay_amount");

        raw.insert("pay".into(), json!(-20));
        let err = Normalizer::default().normalize(&raw).expect_err("negative");
        assert_eq!(err.field, "pay_amount");

        raw.insert("pay".into(), json!(" $1,200 "));
        let gig = Normalizer::default().normalize(&raw).expect("dollar string");
        assert_eq!(gig.pay_amount, 1200);
    }

    #[test]
    fn missing_required_fields_are_named() {
        for (key, field) in [
            ("$id", "id"),
            ("title", "title"),
            ("pay", "pay_amount"),
            ("zip", "location_zip"),
            ("churchIdStr", "organizer_id"),
        ] {
            let mut raw = record(base());
            raw.remove(key);
            let err = Normalizer::default().normalize(&raw).expect_err(key);
            assert_eq!(err.field, field);
        }
    }

    #[test]
    fn bad_zip_and_timestamp_are_malformed() {
        let mut raw = record(base());
        raw.insert("zip".into(), json!("Troy NY"));
        assert_eq!(
            Normalizer::default().normalize(&raw).expect_err("zip").field,
            "location_zip"
        );

        for foreign in ["١٢١٨٠", "１２１８０", "١٢١٨"] {
            let mut raw = record(base());
            raw.insert("zip".into(), json!(foreign));
            assert_eq!(
                Normalizer::default().normalize(&raw).expect_err(foreign).field,
                "location_zip"
            );
        }

        let mut raw = record(base());
        raw.insert("date".into(), json!("next sunday"));
        assert_eq!(
            Normalizer::default().normalize(&raw).expect_err("date").field,
            "event_at"
        );
    }

    #[test]
    fn short_zip_gets_same_padding_as_text_or_number() {
        let mut raw = record(base());
        raw.insert("zip".into(), json!(2134));
        let from_number = Normalizer::default().normalize(&raw).expect("number");

        raw.insert("zip".into(), json!(" 2134 "));
        let from_text = Normalizer::default().normalize(&raw).expect("text");

        assert_eq!(from_number.location_zip.as_str(), "02134");
        assert_eq!(from_text, from_number);

        raw.insert("zip".into(), json!("-213"));
        assert!(Normalizer::default().normalize(&raw).is_err());
    }

    #[test]
    fn unknown_organization_type_becomes_other() {
        let mut raw = record(base());
        raw.insert("type".into(), json!("Venue"));
        let gig = Normalizer::default().normalize(&raw).expect("normalize");
        assert_eq!(gig.organization_type, OrganizationType::Other);

        raw.remove("type");
        let gig = Normalizer::default().normalize(&raw).expect("normalize");
        assert_eq!(gig.organization_type, OrganizationType::Other);
    }

    #[test]
    fn instrument_lists_and_unknown_names_are_kept() {
        let mut raw = record(base());
        raw.remove("Instrument");
        raw.insert("Instruments".into(), json!(["Piano", "Voice"]));
        let gig = Normalizer::default().normalize(&raw).expect("normalize");
        assert_eq!(gig.instrument, "Piano, Voice");

        raw.insert("instrument".into(), json!("theremin"));
        let gig = Normalizer::default().normalize(&raw).expect("normalize");
        assert_eq!(gig.instrument, "theremin");
    }

    #[test]
    fn accepted_gig_is_not_open() {
        let mut raw = record(base());
        raw.insert("acceptedBy".into(), json!("musician-3"));
        let gig = Normalizer::default().normalize(&raw).expect("normalize");
        assert_eq!(gig.accepted_by.as_deref(), Some("musician-3"));
        assert!(!gig.is_open());
    }
}
