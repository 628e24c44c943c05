//! Synthetic scooter telemetry
//!
//! [`SignalGenerator`] advances a small physical state one tick at a time:
//! speed follows the ride phase with Gaussian noise, current rises with load,
//! voltage decays slowly and sags under load, temperatures drift upward, and
//! the IMU reads gravity plus road noise. [`SyntheticSource`] wraps it as a
//! [`TelemetrySource`] clocked by wall time since `start()`.

use crate::phases::RidePhases;
use anyhow::Result;
use chrono::{DateTime, Utc};
use m365_core::model::{truncate_to_second, TelemetryRecord, FW_SRC_SYNTHETIC};
use m365_core::source::TelemetrySource;
use m365_core::topics::DEFAULT_DEVICE_ID;
use m365_core::units::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::time::Instant;

// =============================================================================
// Model constants
// =============================================================================

const SPEED_SD_KMH: f64 = 0.6;

/// Speed at which the load factor reaches 1.0
const FULL_LOAD_KMH: f64 = 25.0;

const MIN_CURRENT_A: f64 = 0.2;
const IDLE_CURRENT_A: f64 = 0.5;
const CURRENT_PER_LOAD_A: f64 = 6.0;
const CURRENT_SD_A: f64 = 0.15;

const FULL_PACK_V: f64 = 42.0;
const DECAY_PER_SEQ_V: f64 = 0.02;
const SAG_PER_LOAD_V: f64 = 0.25;
const VOLTAGE_SD_V: f64 = 0.03;
pub const MIN_PACK_V: f64 = 36.5;
pub const MAX_PACK_V: f64 = 42.2;

const BATT_HEAT_PER_A: f64 = 0.003;
const BATT_TEMP_SD: f64 = 0.01;
const CTRL_HEAT_PER_A: f64 = 0.004;
const CTRL_TEMP_SD: f64 = 0.015;

const LATERAL_SD_MS2: f64 = 0.35;
const VERTICAL_SD_MS2: f64 = 0.12;

/// Mutable physical state, owned by one generator
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorState {
    pub u_batt_v: f64,
    pub i_batt_a: f64,
    pub t_batt_c: f64,
    pub t_ctrl_c: f64,
    pub ax_ms2: f64,
    pub ay_ms2: f64,
    pub az_ms2: f64,
    pub seq: u64,
}

impl Default for GeneratorState {
    fn default() -> Self {
        Self {
            u_batt_v: 40.5,
            i_batt_a: 0.8,
            t_batt_c: 25.0,
            t_ctrl_c: 27.0,
            ax_ms2: 0.05,
            ay_ms2: 0.03,
            az_ms2: 9.80,
            seq: 0,
        }
    }
}

/// Per-device synthetic signal generator
pub struct SignalGenerator {
    device_id: String,
    phases: RidePhases,
    state: GeneratorState,
    rng: StdRng,
}

impl SignalGenerator {
    /// Generator seeded from OS entropy
    pub fn new(device_id: impl Into<String>) -> Self {
        Self::with_rng(device_id, StdRng::from_entropy())
    }

    /// Reproducible generator
    pub fn with_seed(device_id: impl Into<String>, seed: u64) -> Self {
        Self::with_rng(device_id, StdRng::seed_from_u64(seed))
    }

    fn with_rng(device_id: impl Into<String>, rng: StdRng) -> Self {
        Self {
            device_id: device_id.into(),
            phases: RidePhases::default(),
            state: GeneratorState::default(),
            rng,
        }
    }

    /// Replace the ride phase cycle
    pub fn with_phases(mut self, phases: RidePhases) -> Self {
        self.phases = phases;
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn phases(&self) -> &RidePhases {
        &self.phases
    }

    pub fn state(&self) -> &GeneratorState {
        &self.state
    }

    /// Advance one tick and stamp the record with the current time
    pub fn step(&mut self, elapsed_secs: i64) -> TelemetryRecord {
        self.step_at(elapsed_secs, Utc::now())
    }

    /// Advance one tick, stamping the record with `now`
    pub fn step_at(&mut self, elapsed_secs: i64, now: DateTime<Utc>) -> TelemetryRecord {
        let target = self.phases.target_speed(elapsed_secs);
        let speed_kmh = self.gauss(target, SPEED_SD_KMH).max(0.0);
        let load = speed_kmh / FULL_LOAD_KMH;

        let current = IDLE_CURRENT_A + CURRENT_PER_LOAD_A * load + self.gauss(0.0, CURRENT_SD_A);
        self.state.i_batt_a = current.max(MIN_CURRENT_A);

        let voltage = FULL_PACK_V - DECAY_PER_SEQ_V * self.state.seq as f64 - SAG_PER_LOAD_V * load
            + self.gauss(0.0, VOLTAGE_SD_V);
        self.state.u_batt_v = voltage.clamp(MIN_PACK_V, MAX_PACK_V);

        // No cooling term; trips are short
        let amps = self.state.i_batt_a;
        self.state.t_batt_c += BATT_HEAT_PER_A * amps + self.gauss(0.0, BATT_TEMP_SD);
        self.state.t_ctrl_c += CTRL_HEAT_PER_A * amps + self.gauss(0.0, CTRL_TEMP_SD);

        self.state.ax_ms2 = self.gauss(0.0, LATERAL_SD_MS2);
        self.state.ay_ms2 = self.gauss(0.0, LATERAL_SD_MS2);
        self.state.az_ms2 = self.gauss(MetersPerSecondSquared::GRAVITY.0, VERTICAL_SD_MS2);

        self.state.seq += 1;

        TelemetryRecord {
            ts: truncate_to_second(now),
            device_id: self.device_id.clone(),
            u_batt_v: Volts(self.state.u_batt_v),
            i_batt_a: Amperes(self.state.i_batt_a),
            t_batt_c: Celsius(self.state.t_batt_c),
            t_ctrl_c: Celsius(self.state.t_ctrl_c),
            speed_kmh: KilometersPerHour(speed_kmh),
            ax_ms2: MetersPerSecondSquared(self.state.ax_ms2),
            ay_ms2: MetersPerSecondSquared(self.state.ay_ms2),
            az_ms2: MetersPerSecondSquared(self.state.az_ms2),
            fw_src: FW_SRC_SYNTHETIC.to_string(),
            seq: self.state.seq,
            throttle_raw: None,
            motor: None,
            wifi: None,
            hall: None,
        }
    }

    fn gauss(&mut self, mean: f64, sd: f64) -> f64 {
        match Normal::new(mean, sd) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => mean,
        }
    }
}

// =============================================================================
// TelemetrySource wrapper
// =============================================================================

/// Live synthetic source: elapsed trip time is whole seconds since `start()`
pub struct SyntheticSource {
    generator: SignalGenerator,
    started_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(generator: SignalGenerator) -> Self {
        Self {
            generator,
            started_at: None,
        }
    }

    pub fn generator(&self) -> &SignalGenerator {
        &self.generator
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(SignalGenerator::new(DEFAULT_DEVICE_ID))
    }
}

impl TelemetrySource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn start(&mut self) -> Result<()> {
        self.started_at = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started_at = None;
        Ok(())
    }

    fn read_record(&mut self) -> Result<Option<TelemetryRecord>> {
        let Some(started_at) = self.started_at else {
            return Ok(None);
        };
        let elapsed = started_at.elapsed().as_secs() as i64;
        Ok(Some(self.generator.step(elapsed)))
    }

    fn is_active(&self) -> bool {
        self.started_at.is_some()
    }
}
