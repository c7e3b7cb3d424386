//! Opaque keyset cursors
//!
//! A cursor names a resume point in a sorted scan: the sort value of a row
//! plus its document id as tiebreaker. Tokens are base64 over a versioned
//! JSON payload. Clients must treat them as opaque.

use std::cmp::Ordering;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TutorError;

const CURSOR_VERSION_PREFIX: &str = "v1:";

// Upper bound on untrusted token input.
const MAX_CURSOR_TOKEN_LEN: usize = 4096;

/// A sortable field value captured inside a compound cursor
///
/// Values of different kinds order as `Null < Bool < Int < Text < Timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "k", content = "v", rename_all = "camelCase")]
pub enum SortValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl SortValue {
    fn rank(&self) -> u8 {
        match self {
            SortValue::Null => 0,
            SortValue::Bool(_) => 1,
            SortValue::Int(_) => 2,
            SortValue::Text(_) => 3,
            SortValue::Timestamp(_) => 4,
        }
    }

    /// Short name of the value kind, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            SortValue::Null => "null",
            SortValue::Bool(_) => "bool",
            SortValue::Int(_) => "int",
            SortValue::Text(_) => "text",
            SortValue::Timestamp(_) => "timestamp",
        }
    }
}

impl Ord for SortValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortValue::Bool(a), SortValue::Bool(b)) => a.cmp(b),
            (SortValue::Int(a), SortValue::Int(b)) => a.cmp(b),
            (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
            (SortValue::Timestamp(a), SortValue::Timestamp(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for SortValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&str> for SortValue {
    fn from(value: &str) -> Self {
        SortValue::Text(value.to_string())
    }
}

impl From<i64> for SortValue {
    fn from(value: i64) -> Self {
        SortValue::Int(value)
    }
}

impl From<DateTime<Utc>> for SortValue {
    fn from(value: DateTime<Utc>) -> Self {
        SortValue::Timestamp(value)
    }
}

/// Decoded resume position
///
/// `sort_value` is `None` for the simple form used when the scan is ordered
/// by document id alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub sort_value: Option<SortValue>,
    pub id: String,
}

impl Cursor {
    /// Simple cursor holding only the tiebreaker id
    pub fn simple(id: impl Into<String>) -> Self {
        Self {
            sort_value: None,
            id: id.into(),
        }
    }

    /// Compound cursor holding `(sort value, tiebreaker id)`
    pub fn compound(sort_value: SortValue, id: impl Into<String>) -> Self {
        Self {
            sort_value: Some(sort_value),
            id: id.into(),
        }
    }

    /// Encode into an opaque token
    pub fn encode(&self) -> String {
        CursorCodec::encode(self)
    }

    /// Decode from an opaque token
    pub fn decode(token: &str) -> crate::Result<Self> {
        CursorCodec::decode(token)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Payload {
    Simple(String),
    Compound(SortValue, String),
}

/// Cursor encoding/decoding
pub struct CursorCodec;

impl CursorCodec {
    /// Encode cursor to base64
    pub fn encode(cursor: &Cursor) -> String {
        let payload = match &cursor.sort_value {
            None => Payload::Simple(cursor.id.clone()),
            Some(value) => Payload::Compound(value.clone(), cursor.id.clone()),
        };
        // Strings and the closed SortValue enum always serialize.
        let json = serde_json::to_string(&payload).unwrap_or_default();
        BASE64.encode(format!("{CURSOR_VERSION_PREFIX}{json}").as_bytes())
    }

    /// Decode cursor from base64
    pub fn decode(token: &str) -> crate::Result<Cursor> {
        if token.is_empty() {
            return Err(malformed("cursor token is empty"));
        }
        if token.len() > MAX_CURSOR_TOKEN_LEN {
            return Err(malformed(format!(
                "cursor token exceeds {MAX_CURSOR_TOKEN_LEN} characters"
            )));
        }

        let bytes = BASE64.decode(token.as_bytes()).map_err(malformed)?;
        let text = String::from_utf8(bytes).map_err(malformed)?;
        let json = text
            .strip_prefix(CURSOR_VERSION_PREFIX)
            .ok_or_else(|| malformed("unsupported cursor version"))?;

        match serde_json::from_str(json).map_err(malformed)? {
            Payload::Simple(id) => Ok(Cursor::simple(id)),
            Payload::Compound(value, id) => Ok(Cursor::compound(value, id)),
        }
    }
}

fn malformed(reason: impl ToString) -> TutorError {
    TutorError::MalformedCursor(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_simple_cursor_codec() {
        let original = Cursor::simple("5ffdf41a1ee2c62320b49ea1");
        let encoded = original.encode();
        assert_eq!(Cursor::decode(&encoded).unwrap(), original);
    }

    #[test]
    fn test_compound_cursor_codec() {
        let at = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        let original = Cursor::compound(SortValue::Timestamp(at), "session-1");
        let decoded = Cursor::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_simple_id_looking_like_json_is_preserved() {
        let original = Cursor::simple("[\"not\",\"a tuple\"]");
        assert_eq!(Cursor::decode(&original.encode()).unwrap(), original);
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let err = Cursor::decode("not base64!!").unwrap_err();
        assert!(matches!(err, TutorError::MalformedCursor(_)));
    }

    #[test]
    fn test_decode_rejects_empty_and_oversized() {
        assert!(matches!(
            Cursor::decode("").unwrap_err(),
            TutorError::MalformedCursor(_)
        ));
        let huge = "A".repeat(MAX_CURSOR_TOKEN_LEN + 4);
        assert!(matches!(
            Cursor::decode(&huge).unwrap_err(),
            TutorError::MalformedCursor(_)
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let token = BASE64.encode(b"v2:\"abc\"");
        let err = Cursor::decode(&token).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Malformed cursor: unsupported cursor version"
        );
    }

    #[test]
    fn test_decode_rejects_unversioned_plain_id() {
        // Tokens from the older scheme were bare base64 ids.
        let token = BASE64.encode(b"session-1");
        assert!(matches!(
            Cursor::decode(&token).unwrap_err(),
            TutorError::MalformedCursor(_)
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_arity() {
        let token = BASE64.encode(b"v1:[{\"k\":\"int\",\"v\":1},\"a\",\"b\"]");
        assert!(matches!(
            Cursor::decode(&token).unwrap_err(),
            TutorError::MalformedCursor(_)
        ));
    }

    #[test]
    fn test_sort_value_cross_kind_order() {
        let at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let mut values = vec![
            SortValue::Timestamp(at),
            SortValue::Text("a".into()),
            SortValue::Int(3),
            SortValue::Null,
            SortValue::Bool(false),
        ];
        values.sort();
        assert_eq!(
            values.iter().map(SortValue::kind).collect::<Vec<_>>(),
            vec!["null", "bool", "int", "text", "timestamp"]
        );
    }

    fn sort_value_strategy() -> impl Strategy<Value = SortValue> {
        prop_oneof![
            Just(SortValue::Null),
            any::<bool>().prop_map(SortValue::Bool),
            any::<i64>().prop_map(SortValue::Int),
            ".*".prop_map(SortValue::Text),
            (0i64..4_102_444_800).prop_map(|secs| {
                SortValue::Timestamp(Utc.timestamp_opt(secs, 0).unwrap())
            }),
        ]
    }

    proptest! {
        #[test]
        fn prop_cursor_round_trip(value in proptest::option::of(sort_value_strategy()), id in ".{0,64}") {
            let cursor = Cursor { sort_value: value, id };
            prop_assert_eq!(Cursor::decode(&cursor.encode()).unwrap(), cursor);
        }
    }
}
