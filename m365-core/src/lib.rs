//! M365 Digital Twin Core Library
//!
//! Telemetry record model, the source trait implemented by generators and
//! log readers, and the signal conditioning applied before display.

pub mod conditioning;
pub mod error;
pub mod model;
pub mod soc;
pub mod source;
pub mod topics;
pub mod units;

pub use conditioning::{condition, ConditionedSample, ConditionerConfig, SpeedConditioner};
pub use error::RecordError;
pub use model::{TelemetryRecord, TelemetryRow};
pub use soc::SocCurve;
pub use source::TelemetrySource;
pub use topics::DeviceTopics;
