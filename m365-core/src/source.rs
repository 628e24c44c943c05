//! Telemetry source trait definition

use crate::model::TelemetryRecord;
use anyhow::Result;

/// Trait for anything that produces telemetry records for the publisher
///
/// Each source is responsible for:
/// - Initialising its state when started
/// - Producing one record per publisher tick
/// - Releasing resources when stopped
pub trait TelemetrySource: Send {
    /// Short name of this source (e.g., "synthetic")
    fn name(&self) -> &str;

    /// Start producing records
    ///
    /// Resets the source's trip clock.
    fn start(&mut self) -> Result<()>;

    /// Stop producing records
    fn stop(&mut self) -> Result<()>;

    /// Produce the next record
    ///
    /// Returns:
    /// - `Ok(Some(record))` if a record is available
    /// - `Ok(None)` if the source is inactive or exhausted
    /// - `Err(_)` if an error occurred
    fn read_record(&mut self) -> Result<Option<TelemetryRecord>>;

    /// Get whether the source is currently active
    fn is_active(&self) -> bool;
}
