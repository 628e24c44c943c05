//! State-of-charge and range estimation
//!
//! Dashboard-grade piecewise-linear lookup from battery voltage to SOC
//! (0..1). Voltage sags under load, so SOC computed from a loaded reading
//! fluctuates; smooth upstream if that matters.

use serde::{Deserialize, Serialize};

/// Default range at full charge
pub const DEFAULT_MAX_RANGE_KM: f64 = 30.0;

/// Voltage to SOC lookup curve, points sorted by voltage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocCurve {
    points: Vec<(f64, f64)>,
}

impl SocCurve {
    /// Build a curve from `(volts, soc)` points. Points are sorted by voltage.
    pub fn new(mut points: Vec<(f64, f64)>) -> Self {
        points.retain(|(v, s)| v.is_finite() && s.is_finite());
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { points }
    }

    /// 12 V lead-acid branch
    pub fn twelve_volt() -> Self {
        Self::new(vec![
            (11.00, 0.00),
            (11.60, 0.10),
            (11.80, 0.20),
            (12.00, 0.40),
            (12.20, 0.70),
            (12.40, 0.90),
            (12.60, 1.00),
        ])
    }

    /// SOC for a voltage, clamped to the curve's end points.
    ///
    /// Missing or non-finite voltage gives `None`.
    pub fn soc(&self, volts: Option<f64>) -> Option<f64> {
        let v = volts.filter(|v| v.is_finite())?;
        let (first, last) = (self.points.first()?, self.points.last()?);

        if v <= first.0 {
            return Some(first.1);
        }
        if v >= last.0 {
            return Some(last.1);
        }

        self.points.windows(2).find_map(|pair| {
            let ((x1, y1), (x2, y2)) = (pair[0], pair[1]);
            if x1 <= v && v <= x2 {
                if x2 == x1 {
                    return Some(y2);
                }
                let t = (v - x1) / (x2 - x1);
                Some(y1 + t * (y2 - y1))
            } else {
                None
            }
        })
    }
}

impl Default for SocCurve {
    fn default() -> Self {
        Self::twelve_volt()
    }
}

/// Remaining range for a SOC
pub fn estimate_range_km(soc: Option<f64>, max_range_km: f64) -> Option<f64> {
    soc.filter(|s| s.is_finite()).map(|s| s * max_range_km)
}
