//! Type-safe wrappers for physical units
//!
//! Newtype wrappers around f64 so battery, thermal and motion quantities
//! cannot be mixed up. Each unit serializes as a bare JSON number rounded to
//! the precision the telemetry wire format uses for it.

use serde::{Deserialize, Serialize};

/// Round to 1 decimal place (temperatures, speed)
fn round1<S: serde::Serializer>(val: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(round_to(*val, 1))
}

/// Round to 2 decimal places (electrical, acceleration)
fn round2<S: serde::Serializer>(val: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(round_to(*val, 2))
}

/// Round `val` to `decimals` places.
pub fn round_to(val: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (val * factor).round() / factor
}

/// Volts (battery pack voltage)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Volts(#[serde(serialize_with = "round2")] pub f64);

/// Amperes (battery current)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Amperes(#[serde(serialize_with = "round2")] pub f64);

/// Celsius
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Celsius(#[serde(serialize_with = "round1")] pub f64);

/// Kilometers per hour
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct KilometersPerHour(#[serde(serialize_with = "round1")] pub f64);

/// Meters per second squared (acceleration)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct MetersPerSecondSquared(#[serde(serialize_with = "round2")] pub f64);

impl MetersPerSecondSquared {
    /// Standard gravity
    pub const GRAVITY: Self = Self(9.81);
}
