//! Typed records parsed from broker payloads
//!
//! Payloads are JSON objects. A message without a `latitude`/`longitude` pair
//! is not geolocated and parses to `Ok(None)`; it is skipped, not an error.
//! Numeric fields accept JSON numbers as well as numeric strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ParseError;

/// Format of converted sensor timestamps
pub const MEASURED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A record the consumer can buffer and write in bulk
pub trait StreamRecord: Sized + Send + Sync + 'static {
    /// Parse one message. `Ok(None)` means the message is ignored.
    fn parse(topic: &str, payload: &[u8]) -> Result<Option<Self>, ParseError>;
}

/// One field tester uplink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldTestMeasurement {
    /// Device time, epoch milliseconds
    pub time: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub sats: Option<i32>,
    pub battery: Option<i32>,
    pub triggered: Option<String>,
    pub rssi: Option<i32>,
    pub snr: Option<f64>,
    pub uplink: Option<i32>,
    pub downlink: Option<i32>,
}

impl StreamRecord for FieldTestMeasurement {
    fn parse(_topic: &str, payload: &[u8]) -> Result<Option<Self>, ParseError> {
        let obj = object(payload)?;
        let Some((latitude, longitude)) = position(&obj)? else {
            return Ok(None);
        };

        Ok(Some(Self {
            time: int(&obj, "time")?.ok_or(ParseError::MissingField("time"))?,
            latitude,
            longitude,
            sats: small_int(&obj, "sats")?,
            battery: small_int(&obj, "battery")?,
            triggered: text(&obj, "triggered"),
            rssi: small_int(&obj, "rssi")?,
            snr: float(&obj, "snr")?,
            uplink: small_int(&obj, "uplink")?,
            downlink: small_int(&obj, "downlink")?,
        }))
    }
}

/// Latest payload seen on a sensor topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub topic: String,
    pub received_at: DateTime<Utc>,
    /// Sensor time as `YYYY-MM-DD HH:MM:SS` (UTC)
    pub measured_at: Option<String>,
    /// Full payload with `time` replaced by `measured_at` when convertible
    pub payload: Value,
}

impl StreamRecord for SensorReading {
    fn parse(topic: &str, payload: &[u8]) -> Result<Option<Self>, ParseError> {
        let mut obj = object(payload)?;
        if position(&obj)?.is_none() {
            return Ok(None);
        }

        // An unconvertible time keeps the raw value
        let measured_at = match int(&obj, "time") {
            Ok(Some(millis)) => DateTime::<Utc>::from_timestamp_millis(millis)
                .map(|dt| dt.format(MEASURED_AT_FORMAT).to_string()),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(%topic, error = %e, "Cannot convert sensor time");
                None
            },
        };
        if let Some(converted) = &measured_at {
            obj.insert("time".to_string(), Value::String(converted.clone()));
        }

        Ok(Some(Self {
            topic: topic.to_string(),
            received_at: Utc::now(),
            measured_at,
            payload: Value::Object(obj),
        }))
    }
}

fn object(payload: &[u8]) -> Result<Map<String, Value>, ParseError> {
    match serde_json::from_slice(payload)? {
        Value::Object(obj) => Ok(obj),
        _ => Err(ParseError::NotAnObject),
    }
}

fn position(obj: &Map<String, Value>) -> Result<Option<(f64, f64)>, ParseError> {
    if !obj.contains_key("latitude") || !obj.contains_key("longitude") {
        return Ok(None);
    }
    let lat = float(obj, "latitude")?.ok_or(ParseError::MissingField("latitude"))?;
    let lon = float(obj, "longitude")?.ok_or(ParseError::MissingField("longitude"))?;
    Ok(Some((lat, lon)))
}

fn invalid(field: &'static str, value: &Value) -> ParseError {
    ParseError::InvalidField {
        field,
        value: value.to_string(),
    }
}

fn float(obj: &Map<String, Value>, field: &'static str) -> Result<Option<f64>, ParseError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v @ Value::Number(n)) => n.as_f64().map(Some).ok_or_else(|| invalid(field, v)),
        Some(v @ Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid(field, v)),
        Some(v) => Err(invalid(field, v)),
    }
}

fn int(obj: &Map<String, Value>, field: &'static str) -> Result<Option<i64>, ParseError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v @ Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .map(Some)
            .ok_or_else(|| invalid(field, v)),
        Some(v @ Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid(field, v)),
        Some(v) => Err(invalid(field, v)),
    }
}

fn small_int(obj: &Map<String, Value>, field: &'static str) -> Result<Option<i32>, ParseError> {
    match int(obj, field)? {
        None => Ok(None),
        Some(v) => i32::try_from(v).map(Some).map_err(|_| ParseError::InvalidField {
            field,
            value: v.to_string(),
        }),
    }
}

fn text(obj: &Map<String, Value>, field: &str) -> Option<String> {
    match obj.get(field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fieldtest_measurement() {
        let payload = br#"{"time":1700000000000,"latitude":49.44,"longitude":"7.76","sats":"9",
            "battery":87,"triggered":true,"rssi":-97,"snr":7.5,"uplink":412,"downlink":3}"#;
        let m = FieldTestMeasurement::parse("fieldtester/1", payload).unwrap().unwrap();
        assert_eq!(m.time, 1_700_000_000_000);
        assert_eq!(m.longitude, 7.76);
        assert_eq!(m.sats, Some(9));
        assert_eq!(m.triggered.as_deref(), Some("true"));
        assert_eq!(m.rssi, Some(-97));
        assert_eq!(m.snr, Some(7.5));
    }

    #[test]
    fn test_missing_position_is_ignored() {
        let payload = br#"{"time":1700000000000,"battery":87}"#;
        assert!(FieldTestMeasurement::parse("fieldtester/1", payload).unwrap().is_none());
        assert!(SensorReading::parse("geo/sensor1", payload).unwrap().is_none());
    }

    #[test]
    fn test_fieldtest_requires_time() {
        let err = FieldTestMeasurement::parse("fieldtester/1", br#"{"latitude":49.4,"longitude":7.7}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("time")));
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            FieldTestMeasurement::parse("t", b"{not json").unwrap_err(),
            ParseError::Json(_)
        ));
        assert!(matches!(
            SensorReading::parse("t", b"[1,2]").unwrap_err(),
            ParseError::NotAnObject
        ));
        assert!(matches!(
            FieldTestMeasurement::parse("t", br#"{"time":1,"latitude":"north","longitude":7.7}"#).unwrap_err(),
            ParseError::InvalidField { field: "latitude", .. }
        ));
    }

    #[test]
    fn test_sensor_time_is_converted() {
        let payload = br#"{"latitude":49.4,"longitude":7.7,"time":1700000000000,"pm10":12.5}"#;
        let reading = SensorReading::parse("geo/sensor42", payload).unwrap().unwrap();
        assert_eq!(reading.topic, "geo/sensor42");
        assert_eq!(reading.measured_at.as_deref(), Some("2023-11-14 22:13:20"));
        assert_eq!(reading.payload["time"], "2023-11-14 22:13:20");
        assert_eq!(reading.payload["pm10"], 12.5);
    }

    #[test]
    fn test_sensor_keeps_unconvertible_time() {
        let payload = br#"{"latitude":49.4,"longitude":7.7,"time":"yesterday"}"#;
        let reading = SensorReading::parse("geo/sensor42", payload).unwrap().unwrap();
        assert!(reading.measured_at.is_none());
        assert_eq!(reading.payload["time"], "yesterday");
    }
}
