//! Common GraphQL types

use async_graphql::{InputValueError, InputValueResult, Scalar, ScalarType, Value};
use chrono::{DateTime as ChronoDateTime, SecondsFormat, Utc};

/// RFC 3339 timestamp scalar
///
/// Always emitted in UTC with millisecond precision (`2021-06-01T12:00:00.000Z`);
/// any offset is accepted on input and normalized to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTime(pub ChronoDateTime<Utc>);

impl From<ChronoDateTime<Utc>> for DateTime {
    fn from(value: ChronoDateTime<Utc>) -> Self {
        DateTime(value)
    }
}

#[Scalar(name = "DateTime")]
impl ScalarType for DateTime {
    fn parse(value: Value) -> InputValueResult<Self> {
        match value {
            Value::String(raw) => ChronoDateTime::parse_from_rfc3339(&raw)
                .map(|parsed| DateTime(parsed.with_timezone(&Utc)))
                .map_err(|e| InputValueError::custom(format!("invalid timestamp '{raw}': {e}"))),
            other => Err(InputValueError::expected_type(other)),
        }
    }

    fn is_valid(value: &Value) -> bool {
        matches!(value, Value::String(_))
    }

    fn to_value(&self) -> Value {
        Value::String(self.0.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_datetime_to_value() {
        let dt = DateTime(Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap());
        assert_eq!(
            dt.to_value(),
            Value::String("2021-06-01T12:00:00.000Z".to_string())
        );
    }

    #[test]
    fn test_datetime_parse_normalizes_offset() {
        let parsed = <DateTime as ScalarType>::parse(Value::String("2021-06-01T14:00:00+02:00".into())).unwrap();
        assert_eq!(parsed, DateTime(Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap()));
    }

    #[test]
    fn test_datetime_parse_rejects_garbage() {
        assert!(<DateTime as ScalarType>::parse(Value::String("yesterday".into())).is_err());
        assert!(<DateTime as ScalarType>::parse(Value::Boolean(true)).is_err());
    }
}
