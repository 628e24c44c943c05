//! MQTT transport
//!
//! Thin layer over `rumqttc`: connecting with an awaited ConnAck, driving the
//! event loop in the background, and the dashboard's single live listener
//! that feeds decoded rows into a bounded channel.

use crate::config::MqttSettings;
use chrono::Utc;
use m365_core::error::RecordError;
use m365_core::model::{TelemetryRow, FW_SRC_SYNTHETIC};
use serde_json::Value;
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Outgoing, Packet, QoS,
};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Capacity of the listener → dashboard queue
pub const LIVE_QUEUE_CAPACITY: usize = 5000;

/// Requests buffered inside the client before `try_publish` fails
const CLIENT_CAPACITY: usize = 100;

/// Pause after an event-loop error before polling (and reconnecting) again
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: ConnectionError,
    },

    #[error("broker refused connection: {0:?}")]
    Refused(ConnectReturnCode),

    #[error("publish failed: {0}")]
    Publish(#[from] ClientError),
}

/// Connection parameters
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
}

impl BrokerConfig {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            keep_alive: KEEP_ALIVE,
        }
    }

    /// `<prefix>_<unix seconds>`
    pub fn timestamped(host: impl Into<String>, port: u16, prefix: &str) -> Self {
        Self::new(host, port, format!("{}_{}", prefix, Utc::now().timestamp()))
    }

    /// `<prefix>-<uuid>`
    pub fn unique(host: impl Into<String>, port: u16, prefix: &str) -> Self {
        Self::new(host, port, format!("{}-{}", prefix, Uuid::new_v4()))
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options
    }
}

/// A connected client together with its event loop
pub struct MqttConnection {
    pub client: AsyncClient,
    eventloop: EventLoop,
}

/// Connect and wait for the broker's ConnAck. No retry.
pub async fn connect(config: &BrokerConfig) -> Result<MqttConnection, TransportError> {
    tracing::info!("MQTT: connecting to {}:{}", config.host, config.port);
    let (client, mut eventloop) = AsyncClient::new(config.options(), CLIENT_CAPACITY);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    return Err(TransportError::Refused(ack.code));
                }
                break;
            }
            Ok(_) => continue,
            Err(source) => {
                return Err(TransportError::Connect {
                    host: config.host.clone(),
                    port: config.port,
                    source,
                })
            }
        }
    }

    tracing::info!("MQTT: connected as {}", config.client_id);
    Ok(MqttConnection { client, eventloop })
}

impl MqttConnection {
    /// Drive the event loop in the background until `cancel` fires or the
    /// client disconnects. Outgoing publishes only leave through this task.
    pub fn spawn(self, cancel: CancellationToken) -> (AsyncClient, JoinHandle<()>) {
        let MqttConnection {
            client,
            mut eventloop,
        } = self;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = eventloop.poll() => match event {
                        Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("MQTT connection error: {}", e);
                            break;
                        }
                    },
                }
            }
            tracing::debug!("MQTT event loop stopped");
        });

        (client, handle)
    }
}

// =============================================================================
// Live listener (dashboard)
// =============================================================================

/// Decode one live payload into a dashboard row.
///
/// Returns `None` for payloads that are not UTF-8 JSON objects and, when
/// `ignore_synthetic` is set, for emulator records. The synthetic tag is read
/// from the payload itself, before alternate-schema rows are retagged.
pub fn decode_live_payload(payload: &[u8], ignore_synthetic: bool) -> Option<TelemetryRow> {
    let raw: Value = match serde_json::from_slice(payload) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("Dropping MQTT payload: {}", RecordError::from(e));
            return None;
        }
    };

    if ignore_synthetic && raw.get("fw_src").and_then(Value::as_str) == Some(FW_SRC_SYNTHETIC) {
        return None;
    }

    match TelemetryRow::from_value(&raw, Utc::now()) {
        Ok(row) => Some(row),
        Err(e) => {
            tracing::warn!("Dropping MQTT payload: {}", e);
            None
        }
    }
}

/// Push into the bounded queue, dropping the incoming row when full.
///
/// Returns `false` once the consumer is gone.
pub fn enqueue(tx: &mpsc::Sender<TelemetryRow>, row: TelemetryRow) -> bool {
    match tx.try_send(row) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::debug!("Live queue full, dropping message");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// The dashboard's one background subscriber
pub struct LiveListener {
    settings: MqttSettings,
    rx: mpsc::Receiver<TelemetryRow>,
    status: watch::Receiver<Option<String>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl LiveListener {
    /// Start listening. Connection failures are reported through
    /// [`LiveListener::last_error`]; the event loop keeps reconnecting.
    pub fn spawn(settings: MqttSettings) -> Self {
        let (tx, rx) = mpsc::channel(LIVE_QUEUE_CAPACITY);
        let (status_tx, status) = watch::channel(None);
        let cancel = CancellationToken::new();

        let config = BrokerConfig::unique(&settings.host, settings.port, "m365-dashboard");
        let (client, eventloop) = AsyncClient::new(config.options(), CLIENT_CAPACITY);

        let handle = tokio::spawn(listen(
            client,
            eventloop,
            settings.clone(),
            tx,
            status_tx,
            cancel.clone(),
        ));

        tracing::info!(
            "Live MQTT listener started: {}:{} topic='{}'",
            settings.host,
            settings.port,
            settings.topic
        );

        Self {
            settings,
            rx,
            status,
            cancel,
            handle,
        }
    }

    /// A listener fed by an existing channel instead of a broker
    /// subscription. It runs until shut down.
    pub fn from_receiver(settings: MqttSettings, rx: mpsc::Receiver<TelemetryRow>) -> Self {
        let (_, status) = watch::channel(None);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { token.cancelled().await });

        Self {
            settings,
            rx,
            status,
            cancel,
            handle,
        }
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }

    /// Take everything queued so far without waiting
    pub fn drain(&mut self) -> Vec<TelemetryRow> {
        let mut rows = Vec::new();
        while let Ok(row) = self.rx.try_recv() {
            rows.push(row);
        }
        rows
    }

    /// Most recent connection error, cleared on reconnect
    pub fn last_error(&self) -> Option<String> {
        self.status.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the background task
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for LiveListener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn listen(
    client: AsyncClient,
    mut eventloop: EventLoop,
    settings: MqttSettings,
    tx: mpsc::Sender<TelemetryRow>,
    status: watch::Sender<Option<String>>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                status.send_replace(None);
                // Clean session: subscribe again after every (re)connect
                if let Err(e) = client.try_subscribe(settings.topic.as_str(), QoS::AtMostOnce) {
                    tracing::warn!("MQTT subscribe to '{}' failed: {}", settings.topic, e);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let row = decode_live_payload(&publish.payload, settings.ignore_synthetic);
                if let Some(row) = row {
                    if !enqueue(&tx, row) {
                        break;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Live MQTT error: {}", e);
                status.send_replace(Some(e.to_string()));
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                }
            }
        }
    }

    let _ = client.try_disconnect();
    tracing::info!("Live MQTT listener stopped");
}
