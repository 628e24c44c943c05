//! Live (InfluxDB) dashboard source
//!
//! Builds the Flux query for one device over a trailing window, posts it to
//! the v2 query API and parses the CSV answer into dashboard rows. The HTTP
//! and CSV parts sit behind the `influx` feature; without it every query
//! fails with [`InfluxError::Disabled`] so the dashboard can say so.

use crate::config::InfluxSettings;
use chrono::{DateTime, SecondsFormat, Utc};
use m365_core::model::TelemetryRow;
use thiserror::Error;

/// Columns kept by the query, besides `_time`
pub const QUERY_FIELDS: [&str; 8] = [
    "u_batt_v", "i_batt_a", "t_batt_c", "t_ctrl_c", "speed_kmh", "ax_ms2", "ay_ms2", "az_ms2",
];

pub const MEASUREMENT: &str = "scooter";

#[derive(Debug, Error)]
pub enum InfluxError {
    #[error("InfluxDB support not compiled in")]
    Disabled,

    #[cfg(feature = "influx")]
    #[error("InfluxDB request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("InfluxDB query rejected ({status}): {body}")]
    Status { status: u16, body: String },

    #[cfg(feature = "influx")]
    #[error("invalid InfluxDB CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// Flux query for `device_id` over the window ending at `now`
pub fn flux_query(settings: &InfluxSettings, window_minutes: u64, now: DateTime<Utc>) -> String {
    let start = now - chrono::Duration::minutes(window_minutes as i64);
    let keep = std::iter::once("_time")
        .chain(QUERY_FIELDS)
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(",");

    format!(
        r#"from(bucket: "{bucket}")
  |> range(start: {start})
  |> filter(fn: (r) => r._measurement == "{measurement}")
  |> filter(fn: (r) => r.device_id == "{device}")
  |> pivot(rowKey:["_time"], columnKey: ["_field"], valueColumn: "_value")
  |> keep(columns: [{keep}])
"#,
        bucket = escape(&settings.bucket),
        start = start.to_rfc3339_opts(SecondsFormat::Secs, true),
        measurement = MEASUREMENT,
        device = escape(&settings.device_id),
        keep = keep,
    )
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(feature = "influx")]
pub use enabled::*;

#[cfg(feature = "influx")]
mod enabled {
    use super::*;
    use serde_json::{Map, Value};

    /// Parse the query API's CSV: one header row per table, tables separated
    /// by blank lines, `#` annotation rows ignored. Rows come back sorted by
    /// time.
    pub fn parse_query_csv(
        body: &str,
        device_id: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRow>, InfluxError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(body.as_bytes());

        let mut header: Option<Vec<String>> = None;
        let mut rows = Vec::new();

        for record in reader.records() {
            let record = record?;
            if record.iter().all(|f| f.trim().is_empty()) {
                header = None;
                continue;
            }
            if record.iter().any(|f| f == "_time") {
                header = Some(record.iter().map(str::to_string).collect());
                continue;
            }
            let Some(columns) = &header else {
                continue;
            };

            let mut obj = Map::new();
            obj.insert("device_id".to_string(), Value::from(device_id));
            for (name, value) in columns.iter().zip(record.iter()) {
                let key = if name == "_time" { "ts" } else { name.as_str() };
                if key == "ts" || QUERY_FIELDS.contains(&key) {
                    obj.insert(key.to_string(), Value::from(value));
                }
            }

            match TelemetryRow::from_value(&Value::Object(obj), received_at) {
                Ok(row) => rows.push(row),
                Err(e) => tracing::warn!("Skipping InfluxDB row: {}", e),
            }
        }

        rows.sort_by_key(|row| row.ts);
        Ok(rows)
    }

    /// Query API client
    #[derive(Clone, Default)]
    pub struct InfluxClient {
        http: reqwest::Client,
    }

    impl InfluxClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn query(
            &self,
            settings: &InfluxSettings,
            window_minutes: u64,
        ) -> Result<Vec<TelemetryRow>, InfluxError> {
            let now = Utc::now();
            let flux = flux_query(settings, window_minutes, now);
            let url = format!("{}/api/v2/query", settings.url.trim_end_matches('/'));

            let response = self
                .http
                .post(url)
                .query(&[("org", settings.org.as_str())])
                .header("Authorization", format!("Token {}", settings.token))
                .header("Content-Type", "application/vnd.flux")
                .header("Accept", "application/csv")
                .body(flux)
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(InfluxError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            parse_query_csv(&body, &settings.device_id, now)
        }
    }
}

#[cfg(not(feature = "influx"))]
pub use disabled::*;

#[cfg(not(feature = "influx"))]
mod disabled {
    use super::*;

    /// Stand-in client when InfluxDB support is compiled out
    #[derive(Clone, Default)]
    pub struct InfluxClient;

    impl InfluxClient {
        pub fn new() -> Self {
            Self
        }

        pub async fn query(
            &self,
            _settings: &InfluxSettings,
            _window_minutes: u64,
        ) -> Result<Vec<TelemetryRow>, InfluxError> {
            Err(InfluxError::Disabled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 26, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_flux_query_shape() {
        let settings = InfluxSettings::default();
        let flux = flux_query(&settings, 15, now());

        assert!(flux.starts_with(r#"from(bucket: "scooter")"#));
        assert!(flux.contains("range(start: 2025-09-26T11:45:00Z)"));
        assert!(flux.contains(r#"r._measurement == "scooter""#));
        assert!(flux.contains(r#"r.device_id == "m365-lis-01""#));
        assert!(flux.contains(r#"pivot(rowKey:["_time"], columnKey: ["_field"], valueColumn: "_value")"#));
        assert!(flux.contains(r#"keep(columns: ["_time","u_batt_v","i_batt_a","t_batt_c","t_ctrl_c","speed_kmh","ax_ms2","ay_ms2","az_ms2"])"#));
    }

    #[test]
    fn test_flux_query_escapes_quotes() {
        let settings = InfluxSettings {
            device_id: r#"dev" or true"#.to_string(),
            ..InfluxSettings::default()
        };
        assert!(flux_query(&settings, 1, now()).contains(r#"r.device_id == "dev\" or true""#));
    }

    #[cfg(feature = "influx")]
    #[test]
    fn test_parse_query_csv() {
        let body = "\
,result,table,_time,speed_kmh,u_batt_v\r
,_result,0,2025-09-26T11:59:02Z,17.5,40.2\r
,_result,0,2025-09-26T11:59:01Z,16.0,\r
\r
,result,table,_time,speed_kmh\r
,_result,1,2025-09-26T11:59:03Z,18.0\r
";
        let rows = parse_query_csv(body, "m365-lis-01", now()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].speed_kmh, Some(16.0));
        assert_eq!(rows[0].u_batt_v, None);
        assert_eq!(rows[1].u_batt_v, Some(40.2));
        assert_eq!(rows[2].speed_kmh, Some(18.0));
        assert_eq!(rows[2].device_id.as_deref(), Some("m365-lis-01"));
        assert!(rows.windows(2).all(|w| w[0].ts <= w[1].ts));
    }

    #[cfg(feature = "influx")]
    #[test]
    fn test_parse_empty_csv() {
        assert!(parse_query_csv("", "dev", now()).unwrap().is_empty());
        assert!(parse_query_csv("\r\n", "dev", now()).unwrap().is_empty());
    }

    #[cfg(not(feature = "influx"))]
    #[tokio::test]
    async fn test_disabled_client_reports_notice() {
        let err = InfluxClient::new()
            .query(&InfluxSettings::default(), 15)
            .await
            .unwrap_err();
        assert!(matches!(err, InfluxError::Disabled));
    }
}
