use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use thiserror::Error;

/// One sensor sample for one device.
///
/// This is the only reading shape the rest of the service sees. Wire payloads
/// (MQTT publishes, pull responses) come in several shapes — flat or nested
/// under `data`, numbers sometimes encoded as strings — and are all funnelled
/// through [`Reading::from_wire`] at the channel boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub device_id: String,
    /// Producer time: when the sample was measured, not when it was received.
    pub timestamp: DateTime<Utc>,
    /// Volts
    pub voltage: Option<f64>,
    /// Amperes
    pub current: Option<f64>,
    /// Watts
    pub power: Option<f64>,
    /// Watt-hours
    pub energy: Option<f64>,
    pub pir_status: bool,
    pub pump_status: bool,
    pub auto_mode: bool,
}

#[derive(Debug, Error, PartialEq)]
pub enum InvalidReading {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing device_id")]
    MissingDeviceId,
    #[error("missing timestamp")]
    MissingTimestamp,
    #[error("unparseable timestamp: {0}")]
    BadTimestamp(String),
}

/// Numeric timestamps at or above this value are Unix milliseconds.
const MILLIS_CUTOVER: i64 = 1_000_000_000_000;

impl Reading {
    /// Normalize a wire payload into a canonical `Reading`.
    ///
    /// Accepts the reading fields either at the top level or nested under a
    /// `data` key. Measurements may be numbers or numeric strings; anything
    /// absent, malformed, or negative becomes `None` ("unknown"). Status
    /// flags accept bool, 0/1, or `"on"`-style strings and default to
    /// `false`. A missing `device_id` falls back to `device_hint` (the
    /// queried device or the publish topic); a reading without an id or a
    /// usable timestamp is rejected.
    pub fn from_wire(raw: &Value, device_hint: Option<&str>) -> Result<Self, InvalidReading> {
        let body = match raw.get("data") {
            Some(inner) if inner.is_object() => inner,
            _ => raw,
        };
        if !body.is_object() {
            return Err(InvalidReading::NotAnObject);
        }

        let device_id = body
            .get("device_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .or_else(|| {
                device_hint
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
            })
            .ok_or(InvalidReading::MissingDeviceId)?;

        let timestamp = match body.get("timestamp") {
            Some(value) => parse_timestamp(value)?,
            None => return Err(InvalidReading::MissingTimestamp),
        };

        Ok(Self {
            device_id,
            timestamp,
            voltage: field_f64(body, "voltage"),
            current: field_f64(body, "current"),
            power: field_f64(body, "power"),
            energy: field_f64(body, "energy"),
            pir_status: field_bool(body, "pir_status"),
            pump_status: field_bool(body, "pump_status"),
            auto_mode: field_bool(body, "auto_mode"),
        })
    }
}

fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, InvalidReading> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| InvalidReading::BadTimestamp(s.clone())),
        Value::Number(n) => {
            let epoch = n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or_else(|| InvalidReading::BadTimestamp(n.to_string()))?;
            let parsed = if epoch >= MILLIS_CUTOVER {
                Utc.timestamp_millis_opt(epoch).single()
            } else {
                Utc.timestamp_opt(epoch, 0).single()
            };
            parsed.ok_or_else(|| InvalidReading::BadTimestamp(n.to_string()))
        }
        Value::Null => Err(InvalidReading::MissingTimestamp),
        other => Err(InvalidReading::BadTimestamp(other.to_string())),
    }
}

/// Measurements are non-negative; anything else is "unknown", never an error.
fn field_f64(body: &Value, key: &str) -> Option<f64> {
    let parsed = match body.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite() && *v >= 0.0)
}

fn field_bool(body: &Value, key: &str) -> bool {
    match body.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Some(Value::String(s)) => {
            matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "on" | "1")
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -- shapes --------------------------------------------------------------

    #[test]
    fn flat_payload() {
        let raw = json!({
            "device_id": "pump-1",
            "timestamp": 1_700_000_000,
            "voltage": 220.0,
            "current": 2.0,
            "power": 440.0,
            "energy": 12.5,
            "pir_status": true,
            "pump_status": false,
            "auto_mode": true,
        });
        let r = Reading::from_wire(&raw, None).unwrap();
        assert_eq!(r.device_id, "pump-1");
        assert_eq!(r.voltage, Some(220.0));
        assert_eq!(r.current, Some(2.0));
        assert_eq!(r.power, Some(440.0));
        assert_eq!(r.energy, Some(12.5));
        assert!(r.pir_status);
        assert!(!r.pump_status);
        assert!(r.auto_mode);
    }

    #[test]
    fn payload_nested_under_data() {
        let raw = json!({
            "data": { "device_id": "pump-1", "timestamp": 1_700_000_000, "voltage": 231.4 }
        });
        let r = Reading::from_wire(&raw, None).unwrap();
        assert_eq!(r.device_id, "pump-1");
        assert_eq!(r.voltage, Some(231.4));
    }

    #[test]
    fn non_object_data_falls_back_to_top_level() {
        let raw = json!({ "device_id": "d1", "timestamp": 1_700_000_000, "data": "garbage" });
        assert!(Reading::from_wire(&raw, None).is_ok());
    }

    #[test]
    fn array_payload_rejected() {
        let raw = json!([1, 2, 3]);
        assert_eq!(Reading::from_wire(&raw, None), Err(InvalidReading::NotAnObject));
    }

    // -- device id -----------------------------------------------------------

    #[test]
    fn missing_device_id_rejected() {
        let raw = json!({ "timestamp": 1_700_000_000 });
        assert_eq!(Reading::from_wire(&raw, None), Err(InvalidReading::MissingDeviceId));
    }

    #[test]
    fn missing_device_id_recovered_from_hint() {
        let raw = json!({ "timestamp": 1_700_000_000 });
        let r = Reading::from_wire(&raw, Some("node-7")).unwrap();
        assert_eq!(r.device_id, "node-7");
    }

    #[test]
    fn payload_device_id_beats_hint() {
        let raw = json!({ "device_id": "d1", "timestamp": 1_700_000_000 });
        let r = Reading::from_wire(&raw, Some("other")).unwrap();
        assert_eq!(r.device_id, "d1");
    }

    #[test]
    fn empty_device_id_rejected() {
        let raw = json!({ "device_id": "", "timestamp": 1_700_000_000 });
        assert_eq!(Reading::from_wire(&raw, None), Err(InvalidReading::MissingDeviceId));
    }

    // -- timestamps ----------------------------------------------------------

    #[test]
    fn timestamp_rfc3339_string() {
        let raw = json!({ "device_id": "d1", "timestamp": "2023-11-14T22:13:20Z" });
        let r = Reading::from_wire(&raw, None).unwrap();
        assert_eq!(r.timestamp, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    }

    #[test]
    fn timestamp_unix_seconds() {
        let raw = json!({ "device_id": "d1", "timestamp": 1_700_000_000 });
        let r = Reading::from_wire(&raw, None).unwrap();
        assert_eq!(r.timestamp, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    }

    #[test]
    fn timestamp_unix_millis() {
        let raw = json!({ "device_id": "d1", "timestamp": 1_700_000_000_000_i64 });
        let r = Reading::from_wire(&raw, None).unwrap();
        assert_eq!(r.timestamp, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    }

    #[test]
    fn missing_timestamp_rejected() {
        let raw = json!({ "device_id": "d1" });
        assert_eq!(Reading::from_wire(&raw, None), Err(InvalidReading::MissingTimestamp));
    }

    #[test]
    fn null_timestamp_rejected() {
        let raw = json!({ "device_id": "d1", "timestamp": null });
        assert_eq!(Reading::from_wire(&raw, None), Err(InvalidReading::MissingTimestamp));
    }

    #[test]
    fn garbage_timestamp_rejected() {
        let raw = json!({ "device_id": "d1", "timestamp": "yesterday" });
        assert!(matches!(
            Reading::from_wire(&raw, None),
            Err(InvalidReading::BadTimestamp(_))
        ));
    }

    // -- measurements --------------------------------------------------------

    #[test]
    fn string_encoded_measurement_parsed() {
        let raw = json!({ "device_id": "d1", "timestamp": 1_700_000_000, "voltage": "220.5" });
        let r = Reading::from_wire(&raw, None).unwrap();
        assert_eq!(r.voltage, Some(220.5));
    }

    #[test]
    fn unparseable_measurement_becomes_unknown() {
        let raw = json!({ "device_id": "d1", "timestamp": 1_700_000_000, "power": "n/a" });
        let r = Reading::from_wire(&raw, None).unwrap();
        assert_eq!(r.power, None);
    }

    #[test]
    fn negative_measurement_becomes_unknown() {
        let raw = json!({ "device_id": "d1", "timestamp": 1_700_000_000, "current": -1.5 });
        let r = Reading::from_wire(&raw, None).unwrap();
        assert_eq!(r.current, None);
    }

    #[test]
    fn absent_measurements_are_unknown_not_zero() {
        let raw = json!({ "device_id": "d1", "timestamp": 1_700_000_000 });
        let r = Reading::from_wire(&raw, None).unwrap();
        assert_eq!(r.voltage, None);
        assert_eq!(r.current, None);
        assert_eq!(r.power, None);
        assert_eq!(r.energy, None);
    }

    // -- flags ---------------------------------------------------------------

    #[test]
    fn numeric_and_string_flags() {
        let raw = json!({
            "device_id": "d1",
            "timestamp": 1_700_000_000,
            "pir_status": 1,
            "pump_status": "on",
            "auto_mode": "0",
        });
        let r = Reading::from_wire(&raw, None).unwrap();
        assert!(r.pir_status);
        assert!(r.pump_status);
        assert!(!r.auto_mode);
    }

    #[test]
    fn absent_flags_default_to_false() {
        let raw = json!({ "device_id": "d1", "timestamp": 1_700_000_000 });
        let r = Reading::from_wire(&raw, None).unwrap();
        assert!(!r.pir_status);
        assert!(!r.pump_status);
        assert!(!r.auto_mode);
    }
}
