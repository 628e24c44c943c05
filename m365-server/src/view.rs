//! Dashboard view document
//!
//! One refresh worth of derived data: the conditioned series, SOC and range
//! per row, headline metrics and the alternate-device fields. The renderer
//! only draws what is in here.

use crate::config::SourceKind;
use chrono::{DateTime, Utc};
use m365_core::conditioning::{condition, ConditionerConfig};
use m365_core::model::TelemetryRow;
use m365_core::soc::{estimate_range_km, SocCurve, DEFAULT_MAX_RANGE_KM};
use serde::Serialize;

/// Rows repeated in the "latest messages" table
pub const RECENT_ROWS: usize = 50;

pub const NO_DATA_NOTICE: &str = "No data to display. Check the source and filters.";

/// One row plus its derived columns
#[derive(Debug, Clone, Serialize)]
pub struct SeriesPoint {
    #[serde(flatten)]
    pub row: TelemetryRow,
    pub speed_kmh_filt: f64,
    pub soc: Option<f64>,
    pub range_km: Option<f64>,
}

/// Headline metrics from the last row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestMetrics {
    pub u_batt_v: Option<f64>,
    pub i_batt_a: Option<f64>,
    pub speed_kmh_filt: f64,
    pub t_batt_c: Option<f64>,
    pub soc: Option<f64>,
    pub range_km: Option<f64>,
}

/// Alternate-device fields of the last row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceFields {
    pub throttle_raw: Option<f64>,
    pub motor_state: Option<String>,
    pub motor_pwm: Option<f64>,
    pub rssi: Option<f64>,
    pub hall_pulses: Option<f64>,
    pub hall_delta: Option<f64>,
    pub fw_src: String,
}

impl From<&TelemetryRow> for DeviceFields {
    fn from(row: &TelemetryRow) -> Self {
        Self {
            throttle_raw: row.throttle_raw,
            motor_state: row.motor_state.clone(),
            motor_pwm: row.motor_pwm,
            rssi: row.rssi,
            hall_pulses: row.hall_pulses,
            hall_delta: row.hall_delta,
            fw_src: row.fw_src.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub source: SourceKind,
    pub generated_at: DateTime<Utc>,
    pub row_count: usize,
    pub latest: Option<LatestMetrics>,
    /// Present when any row in the window carries alternate-device fields
    pub device: Option<DeviceFields>,
    pub fw_src: Option<String>,
    pub series: Vec<SeriesPoint>,
    pub recent: Vec<SeriesPoint>,
    pub notice: Option<String>,
}

impl DashboardView {
    /// A view with no rows and a notice for the user
    pub fn empty(source: SourceKind, notice: impl Into<String>) -> Self {
        Self {
            source,
            generated_at: Utc::now(),
            row_count: 0,
            latest: None,
            device: None,
            fw_src: None,
            series: Vec::new(),
            recent: Vec::new(),
            notice: Some(notice.into()),
        }
    }

    pub fn build(
        source: SourceKind,
        mut rows: Vec<TelemetryRow>,
        filter: &ConditionerConfig,
        curve: &SocCurve,
    ) -> Self {
        if rows.is_empty() {
            return Self::empty(source, NO_DATA_NOTICE);
        }
        rows.sort_by_key(|row| row.ts);

        let has_extras = rows.iter().any(TelemetryRow::has_device_extras);
        let speeds = condition(&rows, filter);

        let series: Vec<SeriesPoint> = rows
            .into_iter()
            .zip(speeds)
            .map(|(row, speed)| {
                let soc = curve.soc(row.u_batt_v);
                SeriesPoint {
                    speed_kmh_filt: speed.speed_kmh,
                    soc,
                    range_km: estimate_range_km(soc, DEFAULT_MAX_RANGE_KM),
                    row,
                }
            })
            .collect();

        let last = series.last();
        let latest = last.map(|p| LatestMetrics {
            u_batt_v: p.row.u_batt_v,
            i_batt_a: p.row.i_batt_a,
            speed_kmh_filt: p.speed_kmh_filt,
            t_batt_c: p.row.t_batt_c,
            soc: p.soc,
            range_km: p.range_km,
        });
        let device = last
            .filter(|_| has_extras)
            .map(|p| DeviceFields::from(&p.row));
        let fw_src = last.map(|p| p.row.fw_src.clone());
        let recent = series[series.len().saturating_sub(RECENT_ROWS)..].to_vec();

        Self {
            source,
            generated_at: Utc::now(),
            row_count: series.len(),
            latest,
            device,
            fw_src,
            series,
            recent,
            notice: None,
        }
    }

    pub fn with_notice(mut self, notice: impl Into<String>) -> Self {
        self.notice = Some(notice.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn row(secs: i64, payload: serde_json::Value) -> TelemetryRow {
        let t0 = Utc.with_ymd_and_hms(2025, 9, 26, 10, 0, 0).unwrap();
        let mut row = TelemetryRow::from_value(&payload, t0).unwrap();
        row.ts = t0 + Duration::seconds(secs);
        row
    }

    #[test]
    fn test_empty_view_has_notice() {
        let view = DashboardView::build(
            SourceKind::Demo,
            vec![],
            &ConditionerConfig::default(),
            &SocCurve::default(),
        );
        assert_eq!(view.row_count, 0);
        assert_eq!(view.notice.as_deref(), Some(NO_DATA_NOTICE));
        assert!(view.latest.is_none());
    }

    #[test]
    fn test_view_sorts_and_derives_columns() {
        let rows = vec![
            row(2, json!({"u_batt_v": 12.6, "speed_kmh": 20.0, "i_batt_a": 3.0})),
            row(1, json!({"u_batt_v": 12.0, "speed_kmh": 20.0})),
        ];
        let view = DashboardView::build(
            SourceKind::Demo,
            rows,
            &ConditionerConfig::default(),
            &SocCurve::default(),
        );

        assert_eq!(view.row_count, 2);
        assert!(view.series[0].row.ts < view.series[1].row.ts);
        assert_eq!(view.series[0].soc, Some(0.4));
        let latest = view.latest.unwrap();
        assert_eq!(latest.soc, Some(1.0));
        assert_eq!(latest.range_km, Some(30.0));
        assert_eq!(latest.i_batt_a, Some(3.0));
        assert_eq!(latest.speed_kmh_filt, 20.0);
        assert!(view.device.is_none());
        assert_eq!(view.fw_src.as_deref(), Some("unknown"));
    }

    #[test]
    fn test_view_reports_device_fields() {
        let rows = vec![
            row(0, json!({"motor": {"state": "RUN", "pwm": 400}, "hall": {"delta": 30}})),
            row(1, json!({"motor": {"state": "STOP", "pwm": 0}, "hall": {"delta": 0}})),
        ];
        let view = DashboardView::build(
            SourceKind::Mqtt,
            rows,
            &ConditionerConfig::default(),
            &SocCurve::default(),
        );
        let device = view.device.unwrap();
        assert_eq!(device.motor_state.as_deref(), Some("STOP"));
        assert_eq!(device.fw_src, "esp8266");
        assert_eq!(view.latest.unwrap().speed_kmh_filt, 0.0);
    }

    #[test]
    fn test_recent_is_capped() {
        let rows: Vec<_> = (0..120).map(|i| row(i, json!({"speed_kmh": 10.0}))).collect();
        let view = DashboardView::build(
            SourceKind::Demo,
            rows,
            &ConditionerConfig::default(),
            &SocCurve::default(),
        );
        assert_eq!(view.recent.len(), RECENT_ROWS);
        assert_eq!(view.recent[0].row.ts, view.series[70].row.ts);
    }

    #[test]
    fn test_view_serializes_flat_columns() {
        let rows = vec![row(0, json!({"speed_kmh": 5.0, "u_batt_v": 12.2}))];
        let view = DashboardView::build(
            SourceKind::Demo,
            rows,
            &ConditionerConfig::default(),
            &SocCurve::default(),
        );
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["source"], "demo");
        assert_eq!(json["series"][0]["speed_kmh"], 5.0);
        assert_eq!(json["series"][0]["speed_kmh_filt"], 5.0);
        assert!(json["series"][0]["soc"].is_number());
        assert!(json["notice"].is_null());
    }
}
