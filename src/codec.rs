// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Type-aware rendering of source row values into CQL literal text.
//!
//! The mirror talks to the target exclusively through statement text
//! (`INSERT ... JSON`, `DELETE ... WHERE`), so every value that crosses the
//! wire is rendered here. Rendering is dispatched from [`CqlTypeTag`], which
//! is populated from the cluster's schema metadata.
//!
//! Rules:
//! - Textual, inet, uuid and time values are single-quoted with `'` doubled.
//! - `date` is a single-quoted ISO local date.
//! - `timestamp` is emitted as unquoted epoch milliseconds; string input in
//!   `yyyy-MM-ddTHH:mm:ss.SSSZ` form is parsed (`Z` meaning `+0000`), with
//!   short fractions right-padded to milliseconds.
//! - Numerics and booleans are bare literals.
//! - Blobs are `0x` plus lowercase hex.
//! - `list<T>` renders `[e1,e2,...]`, quoting elements iff `T` is in the
//!   text/temporal/inet family.
//!
//! Anything else fails with [`MirrorError::CassandraType`].

use crate::error::{MirrorError, Result};
use crate::session::CqlValue;
use chrono::DateTime;
use serde_json::Value as Json;

/// Tag for a supported CQL column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CqlTypeTag {
    Ascii,
    Text,
    Varchar,
    Inet,
    Time,
    Uuid,
    TimeUuid,
    Date,
    Timestamp,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    VarInt,
    Float,
    Double,
    Decimal,
    Boolean,
    Blob,
    List(Box<CqlTypeTag>),
    /// A type the codec does not support; rendering it fails.
    Other(String),
}

impl CqlTypeTag {
    /// Parse a schema type string (e.g. `"bigint"`, `"list<text>"`).
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        let lower = s.to_ascii_lowercase();
        if let Some(inner) = lower.strip_prefix("list<").and_then(|r| r.strip_suffix('>')) {
            return Self::List(Box::new(Self::parse(inner)));
        }
        match lower.as_str() {
            "ascii" => Self::Ascii,
            "text" => Self::Text,
            "varchar" => Self::Varchar,
            "inet" => Self::Inet,
            "time" => Self::Time,
            "uuid" => Self::Uuid,
            "timeuuid" => Self::TimeUuid,
            "date" => Self::Date,
            "timestamp" => Self::Timestamp,
            "tinyint" => Self::TinyInt,
            "smallint" => Self::SmallInt,
            "int" => Self::Int,
            "bigint" => Self::BigInt,
            "varint" => Self::VarInt,
            "float" => Self::Float,
            "double" => Self::Double,
            "decimal" => Self::Decimal,
            "boolean" => Self::Boolean,
            "blob" => Self::Blob,
            _ => Self::Other(s.to_string()),
        }
    }

    /// Whether list elements of this type are single-quoted.
    fn quoted_in_list(&self) -> bool {
        matches!(
            self,
            Self::Ascii
                | Self::Text
                | Self::Varchar
                | Self::Inet
                | Self::Time
                | Self::Uuid
                | Self::TimeUuid
                | Self::Date
                | Self::Timestamp
        )
    }

    /// Schema name for error messages.
    fn name(&self) -> String {
        match self {
            Self::List(inner) => format!("list<{}>", inner.name()),
            Self::Other(s) => s.clone(),
            other => format!("{:?}", other).to_ascii_lowercase(),
        }
    }
}

/// Column metadata: name plus its type tag.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub tag: CqlTypeTag,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, tag: CqlTypeTag) -> Self {
        Self {
            name: name.into(),
            tag,
        }
    }
}

/// Render one value as a CQL literal for the given column.
pub fn render_literal(column: &str, tag: &CqlTypeTag, value: &CqlValue) -> Result<String> {
    if matches!(value, CqlValue::Null) {
        return Ok("null".to_string());
    }
    match tag {
        CqlTypeTag::Ascii
        | CqlTypeTag::Text
        | CqlTypeTag::Varchar
        | CqlTypeTag::Inet
        | CqlTypeTag::Time
        | CqlTypeTag::Uuid
        | CqlTypeTag::TimeUuid
        | CqlTypeTag::Date => Ok(quote(&string_form(value))),
        CqlTypeTag::Timestamp => Ok(parse_timestamp_millis(column, value)?.to_string()),
        CqlTypeTag::TinyInt
        | CqlTypeTag::SmallInt
        | CqlTypeTag::Int
        | CqlTypeTag::BigInt
        | CqlTypeTag::VarInt
        | CqlTypeTag::Float
        | CqlTypeTag::Double
        | CqlTypeTag::Decimal => Ok(string_form(value)),
        CqlTypeTag::Boolean => match value {
            CqlValue::Boolean(b) => Ok(b.to_string()),
            other => Ok(string_form(other).to_ascii_lowercase()),
        },
        CqlTypeTag::Blob => Ok(blob_literal(value)),
        CqlTypeTag::List(inner) => render_list(column, inner, value),
        CqlTypeTag::Other(name) => Err(MirrorError::CassandraType {
            column: column.to_string(),
            type_name: name.clone(),
        }),
    }
}

fn render_list(column: &str, inner: &CqlTypeTag, value: &CqlValue) -> Result<String> {
    let elems = match value {
        CqlValue::List(elems) => elems.clone(),
        // A scalar in a list column renders as a singleton.
        other => vec![other.clone()],
    };
    if matches!(inner, CqlTypeTag::Other(_)) {
        return Err(MirrorError::CassandraType {
            column: column.to_string(),
            type_name: CqlTypeTag::List(Box::new(inner.clone())).name(),
        });
    }
    let rendered: Vec<String> = elems
        .iter()
        .map(|e| {
            if inner.quoted_in_list() {
                quote(&string_form(e))
            } else if matches!(inner, CqlTypeTag::Blob) {
                blob_literal(e)
            } else {
                string_form(e)
            }
        })
        .collect();
    Ok(format!("[{}]", rendered.join(",")))
}

/// Single-quote a string, doubling internal quotes.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// The plain string form of a value (no quoting).
fn string_form(value: &CqlValue) -> String {
    match value {
        CqlValue::Text(s) => s.clone(),
        CqlValue::Int(v) => v.to_string(),
        CqlValue::Float(v) => v.to_string(),
        CqlValue::Boolean(b) => b.to_string(),
        CqlValue::Timestamp(ms) => ms.to_string(),
        CqlValue::Blob(b) => hex::encode(b),
        CqlValue::List(elems) => elems
            .iter()
            .map(string_form)
            .collect::<Vec<_>>()
            .join(","),
        CqlValue::Null => "null".to_string(),
    }
}

fn blob_literal(value: &CqlValue) -> String {
    match value {
        CqlValue::Blob(bytes) => format!("0x{}", hex::encode(bytes)),
        CqlValue::Text(s) if s.starts_with("0x") || s.starts_with("0X") => {
            format!("0x{}", s[2..].to_ascii_lowercase())
        }
        CqlValue::Text(s) => format!("0x{}", hex::encode(s.as_bytes())),
        other => format!("0x{}", hex::encode(string_form(other).as_bytes())),
    }
}

/// Parse a timestamp value to epoch milliseconds.
///
/// Accepts a native timestamp, an integer, or the string form
/// `yyyy-MM-ddTHH:mm:ss[.SSS]Z` / `...+HHMM`. `Z` is rewritten to `+0000`
/// and fractions shorter than three digits are right-padded.
pub fn parse_timestamp_millis(column: &str, value: &CqlValue) -> Result<i64> {
    match value {
        CqlValue::Timestamp(ms) | CqlValue::Int(ms) => Ok(*ms),
        CqlValue::Text(s) => {
            let normalized = normalize_timestamp(s);
            DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f%z")
                .or_else(|_| DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%z"))
                .map(|dt| dt.timestamp_millis())
                .map_err(|e| {
                    MirrorError::Internal(format!(
                        "unparseable timestamp '{}' in column '{}': {}",
                        s, column, e
                    ))
                })
        }
        other => Err(MirrorError::Internal(format!(
            "timestamp column '{}' holds {:?}",
            column, other
        ))),
    }
}

/// Rewrite a trailing `Z` to `+0000` and pad sub-second digits to millis.
fn normalize_timestamp(s: &str) -> String {
    let mut s = s.trim().to_string();
    if let Some(stripped) = s.strip_suffix('Z') {
        s = format!("{}+0000", stripped);
    }
    if let Some(dot) = s.find('.') {
        let frac_end = s[dot + 1..]
            .find(['+', '-'])
            .map(|i| dot + 1 + i)
            .unwrap_or(s.len());
        let frac_len = frac_end - (dot + 1);
        if frac_len < 3 {
            let pad = "0".repeat(3 - frac_len);
            s.insert_str(frac_end, &pad);
        }
    }
    s
}

/// Serialize one value to its JSON payload form for `INSERT ... JSON`.
///
/// This is the field-by-field serializer used when the server's own JSON
/// representation is lossy for the configured types. Dispatch is by type
/// tag, one arm per scalar.
pub fn json_value(column: &str, tag: &CqlTypeTag, value: &CqlValue) -> Result<Json> {
    if matches!(value, CqlValue::Null) {
        return Ok(Json::Null);
    }
    match tag {
        CqlTypeTag::Ascii
        | CqlTypeTag::Text
        | CqlTypeTag::Varchar
        | CqlTypeTag::Inet
        | CqlTypeTag::Time
        | CqlTypeTag::Uuid
        | CqlTypeTag::TimeUuid
        | CqlTypeTag::Date => Ok(Json::String(string_form(value))),
        CqlTypeTag::Timestamp => Ok(Json::from(parse_timestamp_millis(column, value)?)),
        CqlTypeTag::TinyInt
        | CqlTypeTag::SmallInt
        | CqlTypeTag::Int
        | CqlTypeTag::BigInt
        | CqlTypeTag::VarInt => match value {
            CqlValue::Int(v) => Ok(Json::from(*v)),
            other => other
                .as_i64()
                .map(Json::from)
                .ok_or_else(|| {
                    MirrorError::Internal(format!("non-integer value in column '{}'", column))
                }),
        },
        CqlTypeTag::Float | CqlTypeTag::Double | CqlTypeTag::Decimal => match value {
            CqlValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(Json::Number)
                .ok_or_else(|| {
                    MirrorError::Internal(format!("non-finite float in column '{}'", column))
                }),
            CqlValue::Int(v) => Ok(Json::from(*v)),
            // decimals and varints beyond f64 stay textual
            CqlValue::Text(s) => Ok(Json::String(s.clone())),
            other => Err(MirrorError::Internal(format!(
                "non-numeric value {:?} in column '{}'",
                other, column
            ))),
        },
        CqlTypeTag::Boolean => match value {
            CqlValue::Boolean(b) => Ok(Json::Bool(*b)),
            CqlValue::Text(s) => Ok(Json::Bool(s.eq_ignore_ascii_case("true"))),
            other => Err(MirrorError::Internal(format!(
                "non-boolean value {:?} in column '{}'",
                other, column
            ))),
        },
        CqlTypeTag::Blob => Ok(Json::String(blob_literal(value))),
        CqlTypeTag::List(inner) => {
            let elems = match value {
                CqlValue::List(elems) => elems.clone(),
                other => vec![other.clone()],
            };
            let rendered: Result<Vec<Json>> = elems
                .iter()
                .map(|e| json_value(column, inner, e))
                .collect();
            Ok(Json::Array(rendered?))
        }
        CqlTypeTag::Other(name) => Err(MirrorError::CassandraType {
            column: column.to_string(),
            type_name: name.clone(),
        }),
    }
}

/// Canonicalize empty blob columns in a JSON payload to `"0x"`.
///
/// The server's JSON representation of an empty blob is an empty string,
/// which the target rejects; `0x` is the protocol-level empty blob.
pub fn fix_empty_blobs(payload: &mut Json, columns: &[ColumnMeta]) {
    let Some(obj) = payload.as_object_mut() else {
        return;
    };
    for col in columns {
        if col.tag != CqlTypeTag::Blob {
            continue;
        }
        if let Some(v) = obj.get_mut(&col.name) {
            if v.as_str() == Some("") {
                *v = Json::String("0x".to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(tag: CqlTypeTag, v: CqlValue) -> Result<String> {
        render_literal("c", &tag, &v)
    }

    #[test]
    fn test_parse_scalars() {
        assert_eq!(CqlTypeTag::parse("text"), CqlTypeTag::Text);
        assert_eq!(CqlTypeTag::parse("BIGINT"), CqlTypeTag::BigInt);
        assert_eq!(CqlTypeTag::parse(" boolean "), CqlTypeTag::Boolean);
        assert_eq!(
            CqlTypeTag::parse("list<timeuuid>"),
            CqlTypeTag::List(Box::new(CqlTypeTag::TimeUuid))
        );
        assert_eq!(
            CqlTypeTag::parse("duration"),
            CqlTypeTag::Other("duration".to_string())
        );
    }

    #[test]
    fn test_text_quoting() {
        let lit = render(CqlTypeTag::Text, CqlValue::Text("o'brien".into())).unwrap();
        assert_eq!(lit, "'o''brien'");
    }

    #[test]
    fn test_uuid_and_inet_quoted() {
        let lit = render(
            CqlTypeTag::Uuid,
            CqlValue::Text("6ba7b810-9dad-11d1-80b4-00c04fd430c8".into()),
        )
        .unwrap();
        assert!(lit.starts_with('\'') && lit.ends_with('\''));
        let lit = render(CqlTypeTag::Inet, CqlValue::Text("10.0.0.1".into())).unwrap();
        assert_eq!(lit, "'10.0.0.1'");
    }

    #[test]
    fn test_date_quoted() {
        let lit = render(CqlTypeTag::Date, CqlValue::Text("2024-06-01".into())).unwrap();
        assert_eq!(lit, "'2024-06-01'");
    }

    #[test]
    fn test_timestamp_from_string() {
        let lit = render(
            CqlTypeTag::Timestamp,
            CqlValue::Text("1970-01-01T00:00:01.000Z".into()),
        )
        .unwrap();
        assert_eq!(lit, "1000");
    }

    #[test]
    fn test_timestamp_short_fraction_padded() {
        // ".5" means 500 ms, not 5 ms
        let lit = render(
            CqlTypeTag::Timestamp,
            CqlValue::Text("1970-01-01T00:00:00.5Z".into()),
        )
        .unwrap();
        assert_eq!(lit, "500");
    }

    #[test]
    fn test_timestamp_explicit_offset() {
        let lit = render(
            CqlTypeTag::Timestamp,
            CqlValue::Text("1970-01-01T01:00:00.000+0100".into()),
        )
        .unwrap();
        assert_eq!(lit, "0");
    }

    #[test]
    fn test_timestamp_native() {
        let lit = render(CqlTypeTag::Timestamp, CqlValue::Timestamp(1700000000123)).unwrap();
        assert_eq!(lit, "1700000000123");
    }

    #[test]
    fn test_timestamp_garbage_fails() {
        let err = render(CqlTypeTag::Timestamp, CqlValue::Text("yesterday".into()));
        assert!(err.is_err());
    }

    #[test]
    fn test_numeric_literals() {
        assert_eq!(render(CqlTypeTag::Int, CqlValue::Int(-3)).unwrap(), "-3");
        assert_eq!(
            render(CqlTypeTag::Double, CqlValue::Float(2.5)).unwrap(),
            "2.5"
        );
        assert_eq!(
            render(CqlTypeTag::Decimal, CqlValue::Text("10.000000001".into())).unwrap(),
            "10.000000001"
        );
    }

    #[test]
    fn test_boolean_literal() {
        assert_eq!(
            render(CqlTypeTag::Boolean, CqlValue::Boolean(true)).unwrap(),
            "true"
        );
        assert_eq!(
            render(CqlTypeTag::Boolean, CqlValue::Text("False".into())).unwrap(),
            "false"
        );
    }

    #[test]
    fn test_blob_lowercase_hex() {
        let lit = render(CqlTypeTag::Blob, CqlValue::Blob(vec![0xDE, 0xAD])).unwrap();
        assert_eq!(lit, "0xdead");
    }

    #[test]
    fn test_blob_passthrough_hex_string() {
        let lit = render(CqlTypeTag::Blob, CqlValue::Text("0xDEAD".into())).unwrap();
        assert_eq!(lit, "0xdead");
    }

    #[test]
    fn test_list_of_text_quoted() {
        let lit = render(
            CqlTypeTag::List(Box::new(CqlTypeTag::Text)),
            CqlValue::List(vec![
                CqlValue::Text("a".into()),
                CqlValue::Text("b'c".into()),
            ]),
        )
        .unwrap();
        assert_eq!(lit, "['a','b''c']");
    }

    #[test]
    fn test_list_of_int_unquoted() {
        let lit = render(
            CqlTypeTag::List(Box::new(CqlTypeTag::Int)),
            CqlValue::List(vec![CqlValue::Int(1), CqlValue::Int(2)]),
        )
        .unwrap();
        assert_eq!(lit, "[1,2]");
    }

    #[test]
    fn test_unknown_type_fails() {
        let err = render(
            CqlTypeTag::Other("duration".into()),
            CqlValue::Text("1h".into()),
        );
        match err {
            Err(MirrorError::CassandraType { column, type_name }) => {
                assert_eq!(column, "c");
                assert_eq!(type_name, "duration");
            }
            other => panic!("expected CassandraType, got {:?}", other),
        }
    }

    #[test]
    fn test_null_renders_null() {
        assert_eq!(render(CqlTypeTag::Text, CqlValue::Null).unwrap(), "null");
    }

    #[test]
    fn test_json_value_scalars() {
        assert_eq!(
            json_value("c", &CqlTypeTag::Text, &CqlValue::Text("x".into())).unwrap(),
            serde_json::json!("x")
        );
        assert_eq!(
            json_value("c", &CqlTypeTag::BigInt, &CqlValue::Int(9)).unwrap(),
            serde_json::json!(9)
        );
        assert_eq!(
            json_value("c", &CqlTypeTag::Boolean, &CqlValue::Boolean(false)).unwrap(),
            serde_json::json!(false)
        );
        assert_eq!(
            json_value("c", &CqlTypeTag::Blob, &CqlValue::Blob(vec![0xAB])).unwrap(),
            serde_json::json!("0xab")
        );
        assert_eq!(
            json_value(
                "c",
                &CqlTypeTag::Timestamp,
                &CqlValue::Text("1970-01-01T00:00:02.000Z".into())
            )
            .unwrap(),
            serde_json::json!(2000)
        );
        assert_eq!(
            json_value("c", &CqlTypeTag::Text, &CqlValue::Null).unwrap(),
            serde_json::Value::Null
        );
    }

    #[test]
    fn test_json_value_list() {
        let v = json_value(
            "c",
            &CqlTypeTag::List(Box::new(CqlTypeTag::Int)),
            &CqlValue::List(vec![CqlValue::Int(1), CqlValue::Int(2)]),
        )
        .unwrap();
        assert_eq!(v, serde_json::json!([1, 2]));
    }

    #[test]
    fn test_json_value_unknown_type_fails() {
        let err = json_value(
            "c",
            &CqlTypeTag::Other("frozen<thing>".into()),
            &CqlValue::Text("x".into()),
        );
        assert!(matches!(err, Err(MirrorError::CassandraType { .. })));
    }

    #[test]
    fn test_fix_empty_blobs() {
        let columns = vec![
            ColumnMeta::new("photo", CqlTypeTag::Blob),
            ColumnMeta::new("name", CqlTypeTag::Text),
        ];
        let mut payload = serde_json::json!({"photo": "", "name": ""});
        fix_empty_blobs(&mut payload, &columns);
        assert_eq!(payload["photo"], "0x");
        // non-blob columns are untouched
        assert_eq!(payload["name"], "");
    }

    #[test]
    fn test_fix_empty_blobs_nonempty_untouched() {
        let columns = vec![ColumnMeta::new("photo", CqlTypeTag::Blob)];
        let mut payload = serde_json::json!({"photo": "0xdead"});
        fix_empty_blobs(&mut payload, &columns);
        assert_eq!(payload["photo"], "0xdead");
    }
}
