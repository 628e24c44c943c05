//! Streaming speed conditioning
//!
//! Turns raw, hall-noise-prone speed samples into a display-grade series:
//!
//! 1. clamp to `[0, max_speed_kmh]`
//! 2. rolling median over the last `median_window` samples
//! 3. Hampel-style outlier rejection: the rolling MAD gives a robust sigma
//!    (`1.4826 * MAD`); samples further than `4 * sigma` from the rolling
//!    median are replaced by it
//! 4. exponential moving average seeded by the first available value
//! 5. zero-lock: force 0 when the motor reports STOP, duty is at or below
//!    the PWM threshold, or no hall pulse has been seen for `stop_hold_secs`
//!
//! Each stage is a small state-carrying filter with its own window, so a
//! conditioner can be fed sample by sample or over a whole buffer. Output is
//! always finite and non-negative; missing input ends up as 0.

use crate::model::TelemetryRow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// MAD to standard deviation for normally distributed noise
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// Deviation, in robust sigmas, beyond which a sample is an outlier
pub const OUTLIER_SIGMAS: f64 = 4.0;

/// Motor state reported by the controller when stopped
pub const MOTOR_STOP_STATE: &str = "STOP";

/// Tunables for [`SpeedConditioner`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionerConfig {
    /// Physical clamp ceiling (km/h)
    pub max_speed_kmh: f64,
    /// Rolling median / MAD window (samples, minimum 1)
    pub median_window: usize,
    /// EMA decay factor in (0, 1]
    pub ema_alpha: f64,
    /// Motor duty at or below which speed is locked to zero
    pub pwm_zero_lock: f64,
    /// Seconds without a hall pulse before speed is locked to zero
    pub stop_hold_secs: f64,
}

impl Default for ConditionerConfig {
    fn default() -> Self {
        Self {
            max_speed_kmh: 50.0,
            median_window: 5,
            ema_alpha: 0.25,
            pwm_zero_lock: 140.0,
            stop_hold_secs: 0.8,
        }
    }
}

impl ConditionerConfig {
    /// Replace values the filters cannot work with by usable ones
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();

        self.max_speed_kmh = finite_or(self.max_speed_kmh, defaults.max_speed_kmh).max(0.0);
        self.median_window = self.median_window.max(1);
        self.ema_alpha = if self.ema_alpha.is_finite() && self.ema_alpha > 0.0 {
            self.ema_alpha.min(1.0)
        } else {
            defaults.ema_alpha
        };
        self.pwm_zero_lock = finite_or(self.pwm_zero_lock, defaults.pwm_zero_lock);
        self.stop_hold_secs = finite_or(self.stop_hold_secs, defaults.stop_hold_secs).max(0.0);
        self
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Median of the present values among the last `size` samples
#[derive(Debug, Clone)]
pub struct RollingMedian {
    window: VecDeque<Option<f64>>,
    size: usize,
}

impl RollingMedian {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            window: VecDeque::with_capacity(size),
            size,
        }
    }

    /// Push a sample and return the median of it and its `size - 1`
    /// predecessors. Missing samples occupy a slot but are ignored; `None`
    /// when the whole window is missing.
    pub fn push(&mut self, value: Option<f64>) -> Option<f64> {
        self.window.push_back(value.filter(|v| v.is_finite()));
        while self.window.len() > self.size {
            self.window.pop_front();
        }

        let mut present: Vec<f64> = self.window.iter().flatten().copied().collect();
        median(&mut present)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);

    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Result of one outlier-rejection step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Despiked {
    /// Rolling median at this sample
    pub median: Option<f64>,
    /// Whether the sample was replaced
    pub outlier: bool,
    /// Sample after replacement
    pub value: Option<f64>,
}

/// MAD-based (Hampel) outlier rejection around a rolling median
#[derive(Debug, Clone)]
pub struct OutlierRejector {
    median: RollingMedian,
    mad: RollingMedian,
}

impl OutlierRejector {
    pub fn new(window: usize) -> Self {
        Self {
            median: RollingMedian::new(window),
            mad: RollingMedian::new(window),
        }
    }

    pub fn push(&mut self, value: Option<f64>) -> Despiked {
        let value = value.filter(|v| v.is_finite());
        let median = self.median.push(value);
        let deviation = value.zip(median).map(|(v, m)| (v - m).abs());
        let mad = self.mad.push(deviation);

        let robust_sigma = MAD_TO_SIGMA * mad.unwrap_or(0.0);
        // A flat window has zero sigma and flags nothing
        let outlier = robust_sigma > 0.0
            && deviation.is_some_and(|d| d > OUTLIER_SIGMAS * robust_sigma);

        Despiked {
            median,
            outlier,
            value: if outlier { median } else { value },
        }
    }
}

/// Recursive exponential moving average
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f64,
    state: Option<f64>,
}

impl Ema {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, state: None }
    }

    /// Fold in a sample. The first present sample seeds the average; missing
    /// samples hold the previous value.
    pub fn push(&mut self, value: Option<f64>) -> Option<f64> {
        if let Some(x) = value.filter(|v| v.is_finite()) {
            self.state = Some(match self.state {
                None => x,
                Some(prev) => self.alpha * x + (1.0 - self.alpha) * prev,
            });
        }
        self.state
    }

    pub fn value(&self) -> Option<f64> {
        self.state
    }
}

/// Stationary-vehicle detector behind the zero-lock override
#[derive(Debug, Clone)]
pub struct ZeroLock {
    pwm_threshold: f64,
    hold_secs: f64,
    since_pulse_secs: f64,
    /// Time of the last sample carrying hall data
    last_hall_ts: Option<DateTime<Utc>>,
}

impl ZeroLock {
    pub fn new(pwm_threshold: f64, hold_secs: f64) -> Self {
        Self {
            pwm_threshold,
            hold_secs,
            since_pulse_secs: 0.0,
            last_hall_ts: None,
        }
    }

    /// Seconds accumulated since the last observed pulse
    pub fn since_pulse_secs(&self) -> f64 {
        self.since_pulse_secs
    }

    /// Observe one sample and report whether speed must be forced to zero.
    ///
    /// The pulse accumulator only moves on samples that carry hall data: a
    /// positive delta resets it, a non-positive delta adds the time since the
    /// previous hall sample. Interleaved samples without hall data do not
    /// shorten that gap.
    pub fn push(
        &mut self,
        ts: DateTime<Utc>,
        motor_state: Option<&str>,
        motor_pwm: Option<f64>,
        hall_delta: Option<f64>,
    ) -> bool {
        let pulses_ceased = match hall_delta.filter(|d| d.is_finite()) {
            Some(delta) => {
                let dt = self
                    .last_hall_ts
                    .map(|prev| (ts - prev).num_milliseconds() as f64 / 1000.0)
                    .unwrap_or(0.0)
                    .max(0.0);
                self.last_hall_ts = Some(ts);

                if delta > 0.0 {
                    self.since_pulse_secs = 0.0;
                    false
                } else {
                    self.since_pulse_secs += dt;
                    self.since_pulse_secs >= self.hold_secs
                }
            }
            None => false,
        };

        let motor_stopped =
            motor_state.is_some_and(|s| s.trim().eq_ignore_ascii_case(MOTOR_STOP_STATE));
        let pwm_low = motor_pwm.is_some_and(|p| p.is_finite() && p <= self.pwm_threshold);

        motor_stopped || pwm_low || pulses_ceased
    }
}

/// Per-stage trace of one conditioned sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConditionedSample {
    pub clamped: Option<f64>,
    pub median: Option<f64>,
    pub outlier: bool,
    pub smoothed: Option<f64>,
    pub zero_locked: bool,
    /// Final display speed, finite and non-negative
    pub speed_kmh: f64,
}

/// The full clamp → median → despike → EMA → zero-lock pipeline
#[derive(Debug, Clone)]
pub struct SpeedConditioner {
    max_speed_kmh: f64,
    rejector: OutlierRejector,
    ema: Ema,
    zero_lock: ZeroLock,
}

impl SpeedConditioner {
    pub fn new(config: &ConditionerConfig) -> Self {
        let config = config.clone().normalized();
        Self {
            max_speed_kmh: config.max_speed_kmh,
            rejector: OutlierRejector::new(config.median_window),
            ema: Ema::new(config.ema_alpha),
            zero_lock: ZeroLock::new(config.pwm_zero_lock, config.stop_hold_secs),
        }
    }

    /// Condition the next row in time order
    pub fn push(&mut self, row: &TelemetryRow) -> ConditionedSample {
        let clamped = row
            .speed_kmh
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, self.max_speed_kmh));

        let despiked = self.rejector.push(clamped);
        let smoothed = self.ema.push(despiked.value);
        let zero_locked = self.zero_lock.push(
            row.ts,
            row.motor_state.as_deref(),
            row.motor_pwm,
            row.hall_delta,
        );

        let speed = if zero_locked {
            0.0
        } else {
            smoothed.unwrap_or(0.0)
        };

        ConditionedSample {
            clamped,
            median: despiked.median,
            outlier: despiked.outlier,
            smoothed,
            zero_locked,
            speed_kmh: if speed.is_finite() && speed > 0.0 {
                speed
            } else {
                0.0
            },
        }
    }
}

/// Condition a time-ordered buffer in one pass
pub fn condition(rows: &[TelemetryRow], config: &ConditionerConfig) -> Vec<ConditionedSample> {
    let mut conditioner = SpeedConditioner::new(config);
    rows.iter().map(|row| conditioner.push(row)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 26, 10, 0, 0).unwrap()
    }

    fn row(offset_ms: i64, speed: Option<f64>) -> TelemetryRow {
        TelemetryRow {
            ts: t0() + Duration::milliseconds(offset_ms),
            device_id: None,
            u_batt_v: None,
            i_batt_a: None,
            t_batt_c: None,
            t_ctrl_c: None,
            speed_kmh: speed,
            ax_ms2: None,
            ay_ms2: None,
            az_ms2: None,
            throttle_raw: None,
            motor_state: None,
            motor_pwm: None,
            rssi: None,
            hall_pulses: None,
            hall_delta: None,
            fw_src: "unknown".to_string(),
        }
    }

    fn speeds(samples: &[ConditionedSample]) -> Vec<f64> {
        samples.iter().map(|s| s.speed_kmh).collect()
    }

    #[test]
    fn test_rolling_median_window() {
        let mut med = RollingMedian::new(3);
        assert_eq!(med.push(Some(5.0)), Some(5.0));
        assert_eq!(med.push(Some(1.0)), Some(3.0));
        assert_eq!(med.push(Some(9.0)), Some(5.0));
        // 5.0 falls out of the window
        assert_eq!(med.push(Some(2.0)), Some(2.0));
        assert_eq!(med.len(), 3);
    }

    #[test]
    fn test_rolling_median_ignores_missing() {
        let mut med = RollingMedian::new(3);
        assert_eq!(med.push(None), None);
        assert_eq!(med.push(Some(4.0)), Some(4.0));
        assert_eq!(med.push(None), Some(4.0));
        // 4.0 is still the newest of the last three samples
        assert_eq!(med.push(None), Some(4.0));
        assert_eq!(med.push(None), None);
    }

    #[test]
    fn test_rolling_median_minimum_window_is_one() {
        let mut med = RollingMedian::new(0);
        assert_eq!(med.push(Some(3.0)), Some(3.0));
        assert_eq!(med.push(Some(7.0)), Some(7.0));
    }

    #[test]
    fn test_flat_signal_has_no_outliers() {
        let n = 5;
        let mut rejector = OutlierRejector::new(n);
        for _ in 0..=n {
            let out = rejector.push(Some(12.5));
            assert!(!out.outlier);
            assert_eq!(out.value, Some(12.5));
            assert_eq!(out.median, Some(12.5));
        }
    }

    #[test]
    fn test_spike_replaced_by_median() {
        let mut rejector = OutlierRejector::new(5);
        for v in [10.0, 11.0, 10.0, 11.0] {
            assert!(!rejector.push(Some(v)).outlier);
        }
        let out = rejector.push(Some(45.0));
        assert!(out.outlier, "45 km/h spike should be rejected");
        assert_eq!(out.value, out.median);
        assert_eq!(out.median, Some(11.0));
    }

    #[test]
    fn test_ema_seeded_by_first_value() {
        let mut ema = Ema::new(0.25);
        assert_eq!(ema.push(None), None);
        assert_eq!(ema.push(Some(8.0)), Some(8.0));
        assert_eq!(ema.push(Some(16.0)), Some(10.0));
        assert_eq!(ema.push(None), Some(10.0));
        assert_eq!(ema.value(), Some(10.0));
    }

    #[test]
    fn test_clamp_truncates() {
        let config = ConditionerConfig {
            median_window: 1,
            ema_alpha: 1.0,
            ..ConditionerConfig::default()
        };
        let rows = vec![row(0, Some(-3.0)), row(1000, Some(120.0)), row(2000, Some(20.0))];
        let out = condition(&rows, &config);
        assert_eq!(out[0].clamped, Some(0.0));
        assert_eq!(out[1].clamped, Some(50.0));
        assert_eq!(speeds(&out), vec![0.0, 50.0, 20.0]);
    }

    #[test]
    fn test_constant_series_passes_unchanged() {
        let config = ConditionerConfig::default();
        let rows: Vec<_> = (0..=config.median_window as i64)
            .map(|i| row(i * 1000, Some(18.0)))
            .collect();
        let out = condition(&rows, &config);
        assert!(speeds(&out).iter().all(|&s| s == 18.0));
        assert!(out.iter().all(|s| !s.outlier));
    }

    #[test]
    fn test_all_missing_input_yields_zeros() {
        let rows: Vec<_> = (0..4).map(|i| row(i * 1000, None)).collect();
        let out = condition(&rows, &ConditionerConfig::default());
        assert_eq!(speeds(&out), vec![0.0; 4]);
    }

    #[test]
    fn test_output_finite_and_non_negative() {
        let inputs = [
            Some(f64::NAN),
            Some(f64::INFINITY),
            Some(-1e9),
            Some(1e12),
            None,
            Some(0.0),
            Some(33.3),
            Some(f64::NEG_INFINITY),
        ];
        let rows: Vec<_> = inputs
            .iter()
            .enumerate()
            .map(|(i, v)| row(i as i64 * 500, *v))
            .collect();
        for sample in condition(&rows, &ConditionerConfig::default()) {
            assert!(sample.speed_kmh.is_finite());
            assert!(sample.speed_kmh >= 0.0);
        }
    }

    #[test]
    fn test_zero_lock_motor_stop() {
        let mut r = row(0, Some(20.0));
        r.motor_state = Some("stop".to_string());
        let out = condition(&[r], &ConditionerConfig::default());
        assert!(out[0].zero_locked);
        assert_eq!(out[0].speed_kmh, 0.0);
        assert_eq!(out[0].smoothed, Some(20.0));
    }

    #[test]
    fn test_zero_lock_low_pwm() {
        let config = ConditionerConfig::default();
        let mut low = row(0, Some(20.0));
        low.motor_pwm = Some(config.pwm_zero_lock);
        let mut high = row(1000, Some(20.0));
        high.motor_pwm = Some(config.pwm_zero_lock + 1.0);

        let out = condition(&[low, high], &config);
        assert_eq!(out[0].speed_kmh, 0.0);
        assert!(out[1].speed_kmh > 0.0);
    }

    #[test]
    fn test_zero_lock_after_pulse_absence() {
        let config = ConditionerConfig {
            stop_hold_secs: 0.8,
            ..ConditionerConfig::default()
        };
        let with_hall = |ms: i64, delta: f64| {
            let mut r = row(ms, Some(15.0));
            r.hall_delta = Some(delta);
            r
        };
        let rows = vec![
            with_hall(0, 12.0),
            with_hall(500, 0.0),
            with_hall(1000, 0.0),
            with_hall(1500, 9.0),
            with_hall(2000, 0.0),
        ];
        let out = condition(&rows, &config);

        assert!(!out[0].zero_locked);
        assert!(!out[1].zero_locked, "0.5 s without pulses is below the hold");
        assert!(out[2].zero_locked, "1.0 s without pulses exceeds the hold");
        assert_eq!(out[2].speed_kmh, 0.0);
        assert!(!out[3].zero_locked, "a pulse releases the lock");
        assert!(!out[4].zero_locked, "accumulator restarted from zero");
    }

    #[test]
    fn test_pulse_resets_accumulator() {
        let mut lock = ZeroLock::new(140.0, 0.8);
        lock.push(t0(), None, None, Some(0.0));
        lock.push(t0() + Duration::milliseconds(600), None, None, Some(0.0));
        assert!((lock.since_pulse_secs() - 0.6).abs() < 1e-9);
        lock.push(t0() + Duration::milliseconds(900), None, None, Some(3.0));
        assert_eq!(lock.since_pulse_secs(), 0.0);
    }

    #[test]
    fn test_pulse_gap_spans_rows_without_hall_data() {
        let mut lock = ZeroLock::new(0.0, 0.8);
        let at = |ms: i64| t0() + Duration::milliseconds(ms);

        assert!(!lock.push(at(0), None, None, Some(0.0)));
        assert!(!lock.push(at(500), None, None, None));
        assert!(lock.push(at(1000), None, None, Some(0.0)));
        assert!((lock.since_pulse_secs() - 1.0).abs() < 1e-9);
        assert!(!lock.push(at(1500), None, None, None));
        assert!(lock.push(at(2000), None, None, Some(0.0)));
        assert!((lock.since_pulse_secs() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_rows_without_hall_data_are_not_locked() {
        let rows: Vec<_> = (0..10).map(|i| row(i * 1000, Some(18.0))).collect();
        let out = condition(&rows, &ConditionerConfig::default());
        assert!(out.iter().all(|s| !s.zero_locked));
    }

    #[test]
    fn test_config_normalized() {
        let config = ConditionerConfig {
            max_speed_kmh: f64::NAN,
            median_window: 0,
            ema_alpha: 0.0,
            pwm_zero_lock: 100.0,
            stop_hold_secs: -1.0,
        }
        .normalized();
        assert_eq!(config.max_speed_kmh, 50.0);
        assert_eq!(config.median_window, 1);
        assert_eq!(config.ema_alpha, 0.25);
        assert_eq!(config.stop_hold_secs, 0.0);
    }
}
