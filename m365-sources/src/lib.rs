//! Telemetry sources for the M365 digital twin

pub mod jsonl;
pub mod phases;
pub mod synthetic;

pub use jsonl::{load_rows, JsonlReader, LogEntry};
pub use phases::{Phase, RidePhases};
pub use synthetic::{SignalGenerator, SyntheticSource};
