//! Field values and wire coercion.
//!
//! Values travel as JSON; in memory they are a tagged union so the typed
//! scalars (calendar dates, timestamps, multiselects) round-trip without
//! loss. Coercion is driven by the field descriptor on the way in and by
//! the stored variant on the way out.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::describe::FieldType;
use crate::error::SforceError;
use crate::object::SObject;

// ── Calendar date ───────────────────────────────────────────────────

/// A date with no time or zone. Wire format `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl CalendarDate {
    pub const fn new(year: i32, month: u32, day: u32) -> Self {
        Self { year, month, day }
    }

    /// Parse `YYYY-MM-DD`.
    pub fn parse(s: &str) -> Result<Self, SforceError> {
        let mut parts = s.splitn(3, '-');
        let year = parts.next().and_then(|p| p.parse().ok());
        let month = parts.next().and_then(|p| p.parse().ok());
        let day = parts.next().and_then(|p| p.parse().ok());
        match (year, month, day) {
            (Some(y), Some(m), Some(d)) if (1..=12).contains(&m) && (1..=31).contains(&d) => {
                Ok(Self::new(y, m, d))
            }
            _ => Err(SforceError::Decode(format!("invalid calendar date: {s:?}"))),
        }
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

// ── Child collections ───────────────────────────────────────────────

/// A child-relation collection. Relation subqueries come back as query
/// pages; the locator is kept so the executor can drain the remainder.
#[derive(Debug, Clone, PartialEq)]
pub struct Children {
    pub records: Vec<SObject>,
    pub done: bool,
    pub next_records_url: Option<String>,
}

impl Children {
    /// An empty, complete collection.
    pub fn empty() -> Self {
        Self { records: Vec::new(), done: true, next_records_url: None }
    }

    /// A literal, complete collection.
    pub fn complete(records: Vec<SObject>) -> Self {
        Self { records, done: true, next_records_url: None }
    }
}

// ── Field values ────────────────────────────────────────────────────

/// In-memory value of one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Date(CalendarDate),
    DateTime(DateTime<Utc>),
    MultiPicklist(Vec<String>),
    Parent(Box<SObject>),
    Children(Children),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Interpret a raw scalar according to the descriptor's type. Types
    /// without a declared coercion pass through by JSON shape.
    pub(crate) fn scalar_from_wire(field_type: FieldType, raw: &Value) -> Result<Self, SforceError> {
        if raw.is_null() {
            return Ok(Self::Null);
        }
        match field_type {
            FieldType::Date => {
                let s = expect_str(raw, "date")?;
                Ok(Self::Date(CalendarDate::parse(s)?))
            }
            FieldType::DateTime => {
                let s = expect_str(raw, "datetime")?;
                Ok(Self::DateTime(parse_datetime(s)?))
            }
            FieldType::MultiPicklist => {
                let s = expect_str(raw, "multipicklist")?;
                Ok(Self::MultiPicklist(s.split(';').map(str::to_string).collect()))
            }
            _ => Self::from_json(raw),
        }
    }

    /// Shape-driven conversion for pass-through scalars.
    fn from_json(raw: &Value) -> Result<Self, SforceError> {
        match raw {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Boolean(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Self::Double(f))
                } else {
                    Err(SforceError::Decode(format!("unrepresentable number: {n}")))
                }
            }
            Value::String(s) => Ok(Self::Text(s.clone())),
            _ => Err(SforceError::Decode(format!("scalar field holds {raw}"))),
        }
    }

    /// Serialize a scalar back to its wire form. Relation variants are
    /// handled by the entity serializer, not here.
    pub(crate) fn scalar_to_wire(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Boolean(b) => json!(b),
            Self::Int(i) => json!(i),
            Self::Double(f) => json!(f),
            Self::Text(s) => json!(s),
            Self::Date(d) => json!(d.to_string()),
            Self::DateTime(dt) => json!(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Self::MultiPicklist(items) => json!(items.join(";")),
            Self::Parent(_) | Self::Children(_) => Value::Null,
        }
    }
}

/// Accept RFC 3339 as well as the server's `+0000`-style offsets.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, SforceError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z")
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SforceError::Decode(format!("invalid datetime {s:?}: {e}")))
}

fn expect_str<'a>(raw: &'a Value, what: &str) -> Result<&'a str, SforceError> {
    raw.as_str()
        .ok_or_else(|| SforceError::Decode(format!("{what} field holds {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calendar_date_round_trip() {
        let d = CalendarDate::parse("2024-03-07").unwrap();
        assert_eq!(d, CalendarDate::new(2024, 3, 7));
        assert_eq!(d.to_string(), "2024-03-07");
    }

    #[test]
    fn calendar_date_rejects_garbage() {
        assert!(CalendarDate::parse("2024-13-01").is_err());
        assert!(CalendarDate::parse("not-a-date").is_err());
        assert!(CalendarDate::parse("2024-03").is_err());
    }

    #[test]
    fn multipicklist_splits_and_joins() {
        let v = FieldValue::scalar_from_wire(FieldType::MultiPicklist, &json!("A;B;C")).unwrap();
        assert_eq!(
            v,
            FieldValue::MultiPicklist(vec!["A".into(), "B".into(), "C".into()])
        );
        assert_eq!(v.scalar_to_wire(), json!("A;B;C"));
    }

    #[test]
    fn datetime_accepts_server_offsets() {
        let v = FieldValue::scalar_from_wire(
            FieldType::DateTime,
            &json!("2023-06-01T08:30:00.000+0000"),
        )
        .unwrap();
        match v {
            FieldValue::DateTime(dt) => {
                assert_eq!(dt.to_rfc3339_opts(SecondsFormat::Millis, true), "2023-06-01T08:30:00.000Z");
            }
            other => panic!("expected datetime, got {other:?}"),
        }
    }

    #[test]
    fn datetime_accepts_rfc3339() {
        assert!(
            FieldValue::scalar_from_wire(FieldType::DateTime, &json!("2023-06-01T08:30:00Z")).is_ok()
        );
    }

    #[test]
    fn passthrough_follows_json_shape() {
        assert_eq!(
            FieldValue::scalar_from_wire(FieldType::Text, &json!("x")).unwrap(),
            FieldValue::Text("x".into())
        );
        assert_eq!(
            FieldValue::scalar_from_wire(FieldType::Int, &json!(7)).unwrap(),
            FieldValue::Int(7)
        );
        assert_eq!(
            FieldValue::scalar_from_wire(FieldType::Double, &json!(1.5)).unwrap(),
            FieldValue::Double(1.5)
        );
        assert_eq!(
            FieldValue::scalar_from_wire(FieldType::Boolean, &json!(true)).unwrap(),
            FieldValue::Boolean(true)
        );
    }

    #[test]
    fn null_is_null_regardless_of_type() {
        assert!(FieldValue::scalar_from_wire(FieldType::Date, &Value::Null).unwrap().is_null());
        assert!(FieldValue::scalar_from_wire(FieldType::Text, &Value::Null).unwrap().is_null());
    }
}
