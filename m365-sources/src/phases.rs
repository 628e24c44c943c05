//! Ride phase model
//!
//! A trip is a cyclic sequence of named phases (flat, incline, rough
//! terrain, dynamic riding), each with a duration and a nominal cruising
//! speed. Elapsed trip time wraps modulo the total cycle length.

use serde::{Deserialize, Serialize};

/// Speed returned when no phase covers the requested offset
pub const BASELINE_SPEED_KMH: f64 = 18.0;

/// One named interval of simulated trip time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub duration_secs: u64,
    pub nominal_speed_kmh: f64,
}

impl Phase {
    pub fn new(name: impl Into<String>, duration_secs: u64, nominal_speed_kmh: f64) -> Self {
        Self {
            name: name.into(),
            duration_secs,
            nominal_speed_kmh,
        }
    }
}

/// Ordered, immutable phase cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidePhases {
    phases: Vec<Phase>,
}

impl RidePhases {
    pub fn new(phases: Vec<Phase>) -> Self {
        Self { phases }
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Total period of one cycle
    pub fn cycle_secs(&self) -> u64 {
        self.phases.iter().map(|p| p.duration_secs).sum()
    }

    /// Phase covering `elapsed_secs`, first match in definition order.
    ///
    /// Negative offsets wrap too, so the lookup is total over all integers.
    pub fn phase_at(&self, elapsed_secs: i64) -> Option<&Phase> {
        let cycle = i64::try_from(self.cycle_secs()).ok().filter(|c| *c > 0)?;
        let t = elapsed_secs.rem_euclid(cycle);

        let mut start = 0i64;
        for phase in &self.phases {
            let end = start + phase.duration_secs as i64;
            if start <= t && t < end {
                return Some(phase);
            }
            start = end;
        }
        None
    }

    /// Nominal speed at `elapsed_secs`, or the baseline when nothing matches
    pub fn target_speed(&self, elapsed_secs: i64) -> f64 {
        self.phase_at(elapsed_secs)
            .map(|p| p.nominal_speed_kmh)
            .unwrap_or(BASELINE_SPEED_KMH)
    }
}

impl Default for RidePhases {
    fn default() -> Self {
        Self::new(vec![
            Phase::new("flat", 60, 18.0),
            Phase::new("incline", 60, 14.0),
            Phase::new("rough", 60, 12.0),
            Phase::new("dynamics", 60, 22.0),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_belongs_to_later_phase() {
        let phases = RidePhases::new(vec![
            Phase::new("flat", 60, 18.0),
            Phase::new("incline", 60, 14.0),
        ]);
        assert_eq!(phases.target_speed(30), 18.0);
        assert_eq!(phases.target_speed(60), 14.0);
        assert_eq!(phases.target_speed(90), 14.0);
        assert_eq!(phases.target_speed(120), 18.0);
    }

    #[test]
    fn test_wraps_modulo_cycle() {
        let phases = RidePhases::default();
        let cycle = phases.cycle_secs() as i64;
        assert_eq!(cycle, 240);
        for t in [-500, -1, 0, 59, 60, 179, 239, 240, 1234, 100_000] {
            assert_eq!(phases.target_speed(t), phases.target_speed(t.rem_euclid(cycle)));
            assert_eq!(phases.target_speed(t), phases.target_speed(t + cycle));
        }
    }

    #[test]
    fn test_default_phase_names() {
        let phases = RidePhases::default();
        assert_eq!(phases.phase_at(0).map(|p| p.name.as_str()), Some("flat"));
        assert_eq!(phases.phase_at(130).map(|p| p.name.as_str()), Some("rough"));
        assert_eq!(phases.target_speed(200), 22.0);
    }

    #[test]
    fn test_empty_cycle_falls_back_to_baseline() {
        let phases = RidePhases::new(vec![]);
        assert_eq!(phases.phase_at(10), None);
        assert_eq!(phases.target_speed(10), BASELINE_SPEED_KMH);

        let zero = RidePhases::new(vec![Phase::new("idle", 0, 5.0)]);
        assert_eq!(zero.target_speed(0), BASELINE_SPEED_KMH);
    }
}
