//! Unified telemetry data model
//!
//! Two shapes live here:
//! - [`TelemetryRecord`], the unit of exchange published on the wire by the
//!   emulator. Field names and precision match the scooter schema consumed by
//!   Node-RED / InfluxDB.
//! - [`TelemetryRow`], the flattened, all-optional row the dashboard works
//!   with. It is normalised from either the scooter schema or the alternate
//!   ESP8266 schema (`throttle_raw`, `motor{state,pwm}`, `wifi{rssi}`,
//!   `hall{pulses,delta}`).

use crate::error::RecordError;
use crate::units::*;
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `fw_src` tag stamped on generated records
pub const FW_SRC_SYNTHETIC: &str = "synthetic";

/// `fw_src` tag for rows normalised from the ESP8266 schema
pub const FW_SRC_ESP8266: &str = "esp8266";

/// `fw_src` tag for scooter-schema rows that carry none
pub const FW_SRC_UNKNOWN: &str = "unknown";

/// Key that turns a log record into an event marker
pub const MARKER_KEY: &str = "marker";

/// Keys whose presence selects the ESP8266 schema
const ALTERNATE_SCHEMA_KEYS: [&str; 4] = ["throttle_raw", "motor", "wifi", "hall"];

/// Placeholder hall-delta to km/h scaling for ESP payloads without speed
const HALL_DELTA_TO_KMH: f64 = 0.1;

/// Numeric timestamps above this are unix milliseconds, below are seconds
const UNIX_MILLIS_THRESHOLD: f64 = 100_000_000_000.0;

/// One telemetry sample as published on `<base>/<device_id>/telemetry`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// UTC capture time, second precision
    #[serde(with = "utc_seconds")]
    pub ts: DateTime<Utc>,

    pub device_id: String,

    // === Battery ===
    pub u_batt_v: Volts,
    pub i_batt_a: Amperes,
    pub t_batt_c: Celsius,

    /// Motor controller temperature
    pub t_ctrl_c: Celsius,

    pub speed_kmh: KilometersPerHour,

    // === IMU ===
    pub ax_ms2: MetersPerSecondSquared,
    pub ay_ms2: MetersPerSecondSquared,
    pub az_ms2: MetersPerSecondSquared,

    /// Firmware / source tag ("synthetic" for the emulator)
    pub fw_src: String,

    /// Per-device sequence number, strictly increasing per generator
    pub seq: u64,

    // === Alternate device fields ===
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle_raw: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motor: Option<MotorStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wifi: Option<WifiStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hall: Option<HallSensor>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MotorStatus {
    /// e.g. "RUN" / "STOP"
    pub state: Option<String>,
    /// Motor duty
    pub pwm: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WifiStatus {
    pub rssi: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HallSensor {
    /// Cumulative pulse count
    pub pulses: Option<f64>,
    /// Pulses since the previous message
    pub delta: Option<f64>,
}

impl TelemetryRecord {
    /// Serialize to the compact single-line wire form
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Flattened dashboard row. Every measurement is optional because partial
/// schemas are the norm on the live path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRow {
    pub ts: DateTime<Utc>,
    pub device_id: Option<String>,

    pub u_batt_v: Option<f64>,
    pub i_batt_a: Option<f64>,
    pub t_batt_c: Option<f64>,
    pub t_ctrl_c: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub ax_ms2: Option<f64>,
    pub ay_ms2: Option<f64>,
    pub az_ms2: Option<f64>,

    pub throttle_raw: Option<f64>,
    pub motor_state: Option<String>,
    pub motor_pwm: Option<f64>,
    pub rssi: Option<f64>,
    pub hall_pulses: Option<f64>,
    pub hall_delta: Option<f64>,

    pub fw_src: String,
}

impl TelemetryRow {
    /// Normalise a decoded JSON payload.
    ///
    /// `received_at` stands in for a missing or unparsable `ts`.
    pub fn from_value(raw: &Value, received_at: DateTime<Utc>) -> Result<Self, RecordError> {
        let obj = raw.as_object().ok_or(RecordError::NotAnObject)?;
        let field = |key: &str| numeric(obj.get(key));

        let mut row = Self {
            ts: obj
                .get("ts")
                .and_then(parse_timestamp)
                .unwrap_or(received_at),
            device_id: obj.get("device_id").and_then(text),
            u_batt_v: field("u_batt_v"),
            i_batt_a: field("i_batt_a"),
            t_batt_c: field("t_batt_c"),
            t_ctrl_c: field("t_ctrl_c"),
            speed_kmh: field("speed_kmh"),
            ax_ms2: field("ax_ms2"),
            ay_ms2: field("ay_ms2"),
            az_ms2: field("az_ms2"),
            throttle_raw: field("throttle_raw"),
            motor_state: obj.get("motor_state").and_then(text),
            motor_pwm: field("motor_pwm"),
            rssi: field("rssi"),
            hall_pulses: field("hall_pulses"),
            hall_delta: field("hall_delta"),
            fw_src: obj
                .get("fw_src")
                .and_then(text)
                .unwrap_or_else(|| FW_SRC_UNKNOWN.to_string()),
        };

        if ALTERNATE_SCHEMA_KEYS.iter().any(|k| obj.contains_key(*k)) {
            let nested = |outer: &str, inner: &str| obj.get(outer).and_then(|o| o.get(inner));

            row.motor_state = nested("motor", "state").and_then(text);
            row.motor_pwm = numeric(nested("motor", "pwm"));
            row.rssi = numeric(nested("wifi", "rssi"));
            row.hall_pulses = numeric(nested("hall", "pulses"));
            row.hall_delta = numeric(nested("hall", "delta"));
            row.t_batt_c = row.t_batt_c.or_else(|| field("temp_c"));
            row.fw_src = FW_SRC_ESP8266.to_string();

            if row.speed_kmh.is_none() {
                row.speed_kmh = Some(row.hall_delta.unwrap_or(0.0) * HALL_DELTA_TO_KMH);
            }
        }

        Ok(row)
    }

    /// Decode and normalise one JSON text payload
    pub fn from_json(payload: &str, received_at: DateTime<Utc>) -> Result<Self, RecordError> {
        let raw: Value = serde_json::from_str(payload)?;
        Self::from_value(&raw, received_at)
    }

    /// Whether this row came from the emulator
    pub fn is_synthetic(&self) -> bool {
        self.fw_src == FW_SRC_SYNTHETIC
    }

    /// Whether any alternate-device field is populated
    pub fn has_device_extras(&self) -> bool {
        self.throttle_raw.is_some()
            || self.motor_state.is_some()
            || self.motor_pwm.is_some()
            || self.rssi.is_some()
            || self.hall_pulses.is_some()
            || self.hall_delta.is_some()
    }
}

impl From<&TelemetryRecord> for TelemetryRow {
    fn from(record: &TelemetryRecord) -> Self {
        let motor = record.motor.clone().unwrap_or_default();
        let hall = record.hall.clone().unwrap_or_default();
        Self {
            ts: record.ts,
            device_id: Some(record.device_id.clone()),
            u_batt_v: Some(record.u_batt_v.0),
            i_batt_a: Some(record.i_batt_a.0),
            t_batt_c: Some(record.t_batt_c.0),
            t_ctrl_c: Some(record.t_ctrl_c.0),
            speed_kmh: Some(record.speed_kmh.0),
            ax_ms2: Some(record.ax_ms2.0),
            ay_ms2: Some(record.ay_ms2.0),
            az_ms2: Some(record.az_ms2.0),
            throttle_raw: record.throttle_raw,
            motor_state: motor.state,
            motor_pwm: motor.pwm,
            rssi: record.wifi.as_ref().and_then(|w| w.rssi),
            hall_pulses: hall.pulses,
            hall_delta: hall.delta,
            fw_src: record.fw_src.clone(),
        }
    }
}

/// Whether a decoded log record is an event marker
pub fn is_marker(raw: &Value) -> bool {
    raw.as_object()
        .is_some_and(|obj| obj.contains_key(MARKER_KEY))
}

/// Coerce a JSON value to a finite number. Numeric strings are accepted,
/// anything else is treated as missing.
pub fn numeric(value: Option<&Value>) -> Option<f64> {
    let v = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    v.filter(|x| x.is_finite())
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Parse a timestamp given as an ISO-8601 string or a unix number
/// (seconds, or milliseconds above 1e11).
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => n.as_f64().and_then(from_unix),
        _ => None,
    }
}

/// Parse an ISO-8601 / RFC 3339 timestamp. Naive timestamps are taken as UTC.
pub fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn from_unix(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    let millis = if value > UNIX_MILLIS_THRESHOLD {
        value
    } else {
        value * 1000.0
    };
    DateTime::from_timestamp_millis(millis.round() as i64)
}

/// Drop sub-second precision
pub fn truncate_to_second(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Serde adapter for `YYYY-MM-DDTHH:MM:SSZ` timestamps
pub mod utc_seconds {
    use super::parse_timestamp_str;
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&ts.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timestamp_str(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 26, 12, 0, 0).unwrap()
    }

    fn make_test_record() -> TelemetryRecord {
        TelemetryRecord {
            ts: Utc.with_ymd_and_hms(2025, 9, 26, 10, 15, 30).unwrap(),
            device_id: "m365-lis-01".to_string(),
            u_batt_v: Volts(40.4567),
            i_batt_a: Amperes(4.321),
            t_batt_c: Celsius(25.04),
            t_ctrl_c: Celsius(27.16),
            speed_kmh: KilometersPerHour(18.26),
            ax_ms2: MetersPerSecondSquared(0.123),
            ay_ms2: MetersPerSecondSquared(-0.2),
            az_ms2: MetersPerSecondSquared(9.806),
            fw_src: FW_SRC_SYNTHETIC.to_string(),
            seq: 7,
            throttle_raw: None,
            motor: None,
            wifi: None,
            hall: None,
        }
    }

    #[test]
    fn test_record_wire_format() {
        let json = make_test_record().to_json().unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["ts"], "2025-09-26T10:15:30Z");
        assert_eq!(parsed["device_id"], "m365-lis-01");
        assert_eq!(parsed["u_batt_v"], 40.46);
        assert_eq!(parsed["i_batt_a"], 4.32);
        assert_eq!(parsed["t_batt_c"], 25.0);
        assert_eq!(parsed["t_ctrl_c"], 27.2);
        assert_eq!(parsed["speed_kmh"], 18.3);
        assert_eq!(parsed["az_ms2"], 9.81);
        assert_eq!(parsed["fw_src"], "synthetic");
        assert_eq!(parsed["seq"], 7);

        // Alternate device fields are omitted when absent
        assert!(parsed.get("motor").is_none());
        assert!(parsed.get("hall").is_none());
        assert!(!json.contains('\n'));
    }

    #[test]
    fn test_record_wire_format_with_device_fields() {
        let mut record = make_test_record();
        record.motor = Some(MotorStatus {
            state: Some("RUN".to_string()),
            pwm: Some(512.0),
        });
        record.hall = Some(HallSensor {
            pulses: Some(1200.0),
            delta: Some(14.0),
        });

        let parsed: Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(parsed["motor"]["state"], "RUN");
        assert_eq!(parsed["hall"]["delta"], 14.0);

        let back: TelemetryRecord = serde_json::from_value(parsed).unwrap();
        assert_eq!(back.seq, 7);
        assert_eq!(back.ts, record.ts);
    }

    #[test]
    fn test_row_from_scooter_schema() {
        let raw = json!({
            "ts": "2025-09-26T10:00:00Z",
            "device_id": "m365-lis-01",
            "u_batt_v": 40.1,
            "speed_kmh": "17.5",
            "fw_src": "synthetic",
            "seq": 3
        });
        let row = TelemetryRow::from_value(&raw, received()).unwrap();

        assert_eq!(row.ts, Utc.with_ymd_and_hms(2025, 9, 26, 10, 0, 0).unwrap());
        assert_eq!(row.device_id.as_deref(), Some("m365-lis-01"));
        assert_eq!(row.u_batt_v, Some(40.1));
        assert_eq!(row.speed_kmh, Some(17.5));
        assert_eq!(row.i_batt_a, None);
        assert!(row.is_synthetic());
        assert!(!row.has_device_extras());
    }

    #[test]
    fn test_row_scooter_schema_defaults_fw_src() {
        let row = TelemetryRow::from_value(&json!({"speed_kmh": 10}), received()).unwrap();
        assert_eq!(row.fw_src, FW_SRC_UNKNOWN);
        assert_eq!(row.ts, received(), "missing ts falls back to receive time");
    }

    #[test]
    fn test_row_from_esp_schema() {
        let raw = json!({
            "throttle_raw": 320,
            "motor": {"state": "RUN", "pwm": 410},
            "wifi": {"rssi": -61},
            "temp_c": 31.5,
            "hall": {"pulses": 900, "delta": 42},
            "fw_src": "whatever"
        });
        let row = TelemetryRow::from_value(&raw, received()).unwrap();

        assert_eq!(row.fw_src, FW_SRC_ESP8266);
        assert_eq!(row.motor_state.as_deref(), Some("RUN"));
        assert_eq!(row.motor_pwm, Some(410.0));
        assert_eq!(row.rssi, Some(-61.0));
        assert_eq!(row.hall_pulses, Some(900.0));
        assert_eq!(row.t_batt_c, Some(31.5), "temp_c backs t_batt_c");
        let speed = row.speed_kmh.unwrap();
        assert!((speed - 4.2).abs() < 1e-9, "speed derived from hall delta");
        assert!(row.has_device_extras());
        assert!(!row.is_synthetic());
    }

    #[test]
    fn test_row_esp_schema_without_hall_delta_has_zero_speed() {
        let row = TelemetryRow::from_value(&json!({"motor": {"state": "STOP"}}), received())
            .unwrap();
        assert_eq!(row.speed_kmh, Some(0.0));
    }

    #[test]
    fn test_row_esp_schema_keeps_explicit_speed() {
        let raw = json!({"hall": {"delta": 42}, "speed_kmh": 12.0});
        let row = TelemetryRow::from_value(&raw, received()).unwrap();
        assert_eq!(row.speed_kmh, Some(12.0));
    }

    #[test]
    fn test_row_rejects_non_object() {
        assert!(matches!(
            TelemetryRow::from_value(&json!([1, 2]), received()),
            Err(RecordError::NotAnObject)
        ));
        assert!(matches!(
            TelemetryRow::from_json("{not json", received()),
            Err(RecordError::Json(_))
        ));
    }

    #[test]
    fn test_row_from_record() {
        let record = make_test_record();
        let row = TelemetryRow::from(&record);
        assert_eq!(row.speed_kmh, Some(18.26));
        assert_eq!(row.fw_src, "synthetic");
        assert_eq!(row.hall_delta, None);
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2025, 9, 26, 10, 0, 0).unwrap();

        assert_eq!(parse_timestamp(&json!("2025-09-26T10:00:00Z")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2025-09-26T12:00:00+02:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2025-09-26T10:00:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!(expected.timestamp())), Some(expected));
        assert_eq!(
            parse_timestamp(&json!(expected.timestamp_millis())),
            Some(expected)
        );
        assert_eq!(parse_timestamp(&json!("")), None);
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&Value::Null), None);
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(numeric(Some(&json!(3))), Some(3.0));
        assert_eq!(numeric(Some(&json!(" 2.5 "))), Some(2.5));
        assert_eq!(numeric(Some(&json!("fast"))), None);
        assert_eq!(numeric(Some(&json!("NaN"))), None);
        assert_eq!(numeric(Some(&json!(true))), None);
        assert_eq!(numeric(None), None);
    }

    #[test]
    fn test_is_marker() {
        assert!(is_marker(&json!({"marker": "start", "ts": "2025-09-26T10:00:00Z"})));
        assert!(is_marker(&json!({"marker": null})));
        assert!(!is_marker(&json!({"speed_kmh": 1.0})));
        assert!(!is_marker(&json!("marker")));
    }

    #[test]
    fn test_truncate_to_second() {
        let ts = Utc.timestamp_millis_opt(1_758_880_800_123).unwrap();
        assert_eq!(truncate_to_second(ts).timestamp_subsec_nanos(), 0);
    }
}
