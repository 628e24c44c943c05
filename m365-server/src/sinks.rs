//! Output sink implementations
//!
//! Sinks take one serialized record per call along with the topic it belongs
//! to. Publishing is fire-and-forget: a sink reports local failures only.

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, QoS};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Trait for output sinks
pub trait Sink: Send {
    fn send(&mut self, topic: &str, payload: &str) -> Result<()>;

    /// Flush buffered output
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// MQTT publish sink, QoS 0 and not retained
pub struct MqttSink {
    client: AsyncClient,
}

impl MqttSink {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

impl Sink for MqttSink {
    fn send(&mut self, topic: &str, payload: &str) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .with_context(|| format!("Failed to queue publish on {}", topic))?;
        Ok(())
    }
}

/// Append-only NDJSON file sink. The topic is not recorded.
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        Ok(Self { file })
    }
}

impl Sink for FileSink {
    fn send(&mut self, _topic: &str, payload: &str) -> Result<()> {
        writeln!(self.file, "{}", payload)?;
        self.file.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

/// In-memory sink used by tests and dry runs
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub sent: Vec<(String, String)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topics(&self) -> Vec<&str> {
        self.sent.iter().map(|(t, _)| t.as_str()).collect()
    }
}

impl Sink for MemorySink {
    fn send(&mut self, topic: &str, payload: &str) -> Result<()> {
        self.sent.push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}
