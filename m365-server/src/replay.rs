//! NDJSON log replay
//!
//! Republishes a recorded log in file order with a fixed delay between
//! publishes. Marker records go to the device's events topic, everything
//! else to its telemetry topic.

use crate::sinks::Sink;
use anyhow::Result;
use m365_core::topics::DeviceTopics;
use m365_sources::jsonl::JsonlReader;
use serde::Serialize;
use std::io::BufRead;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Counts reported at the end of a replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub telemetry: usize,
    pub markers: usize,
    /// Malformed lines
    pub skipped: usize,
    /// Records the sink rejected
    pub failed: usize,
}

pub struct LogReplayer {
    topics: DeviceTopics,
    delay: Duration,
}

impl LogReplayer {
    pub fn new(topics: DeviceTopics, delay: Duration) -> Self {
        Self { topics, delay }
    }

    /// Replay every entry of `reader` into `sink`, stopping early on cancel
    pub async fn replay<R: BufRead>(
        &self,
        mut reader: JsonlReader<R>,
        sink: &mut dyn Sink,
        cancel: &CancellationToken,
    ) -> Result<ReplaySummary> {
        let mut summary = ReplaySummary::default();
        let mut first = true;

        for entry in reader.by_ref() {
            let entry = entry?;

            if !first && !self.delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
            if cancel.is_cancelled() {
                break;
            }
            first = false;

            let topic = if entry.is_marker() {
                self.topics.events()
            } else {
                self.topics.telemetry()
            };
            let payload = serde_json::to_string(entry.value())?;

            match sink.send(&topic, &payload) {
                Ok(()) if entry.is_marker() => summary.markers += 1,
                Ok(()) => summary.telemetry += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!("Failed to publish to {}: {:#}", topic, e);
                }
            }
            tracing::debug!("Replayed to {}", topic);
        }

        summary.skipped = reader.skipped();
        tracing::info!(
            "Replay finished: {} telemetry, {} markers, {} skipped",
            summary.telemetry,
            summary.markers,
            summary.skipped
        );
        Ok(summary)
    }
}
