//! Fixed-rate telemetry publisher
//!
//! Pulls one record per tick from a [`TelemetrySource`], serializes it once
//! and hands the same line to every sink (MQTT, optional NDJSON log).

use crate::sinks::Sink;
use anyhow::{Context, Result};
use m365_core::model::TelemetryRecord;
use m365_core::source::TelemetrySource;
use m365_core::topics::DeviceTopics;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct TelemetryPublisher {
    source: Box<dyn TelemetrySource>,
    topics: DeviceTopics,
    sinks: Vec<Box<dyn Sink>>,
    period: Duration,
    published: u64,
}

impl TelemetryPublisher {
    pub fn new(source: Box<dyn TelemetrySource>, topics: DeviceTopics, period: Duration) -> Self {
        Self {
            source,
            topics,
            sinks: Vec::new(),
            period,
            published: 0,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    /// Generate and publish one record
    pub fn publish_once(&mut self) -> Result<Option<TelemetryRecord>> {
        let Some(record) = self.source.read_record()? else {
            return Ok(None);
        };

        let payload = record.to_json().context("Failed to serialize record")?;
        let topic = self.topics.telemetry();
        for sink in &mut self.sinks {
            if let Err(e) = sink.send(&topic, &payload) {
                warn!("Sink error: {:#}", e);
            }
        }

        self.published += 1;
        info!(
            "[SEND] ts={}  speed={:.1} km/h",
            payload_ts(&record),
            record.speed_kmh.0
        );
        Ok(Some(record))
    }

    /// Publish every `period` until `cancel` fires, then stop the source and
    /// flush the sinks. Returns the number of records published.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<u64> {
        self.source.start()?;
        info!(
            "Publishing to topic='{}' every {:?}",
            self.topics.telemetry(),
            self.period
        );

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.publish_once() {
                        warn!("Failed to publish record: {:#}", e);
                    }
                }
            }
        }

        self.source.stop()?;
        for sink in &mut self.sinks {
            if let Err(e) = sink.flush() {
                warn!("Failed to flush sink: {:#}", e);
            }
        }
        info!("Publisher stopped after {} records", self.published);
        Ok(self.published)
    }
}

fn payload_ts(record: &TelemetryRecord) -> String {
    record
        .ts
        .format(m365_core::model::utc_seconds::FORMAT)
        .to_string()
}
