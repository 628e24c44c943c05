//! M365 real-time MQTT emulator
//!
//! Publishes synthetic scooter telemetry to `<base>/<device>/telemetry` at a
//! fixed rate, optionally mirroring every record to an NDJSON log.

use anyhow::{Context, Result};
use clap::Parser;
use m365_server::config::EmulatorArgs;
use m365_server::mqtt::{self, BrokerConfig};
use m365_server::publisher::TelemetryPublisher;
use m365_server::sinks::{FileSink, MqttSink};
use m365_server::{logging, shutdown};
use m365_sources::{SignalGenerator, SyntheticSource};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();
    let args = EmulatorArgs::parse();

    let broker = BrokerConfig::timestamped(&args.broker.host, args.broker.port, "m365_emulator");
    let connection = mqtt::connect(&broker)
        .await
        .context("MQTT connection failed")?;

    let driver_cancel = CancellationToken::new();
    let (client, driver) = connection.spawn(driver_cancel.clone());

    let generator = match args.seed {
        Some(seed) => SignalGenerator::with_seed(&args.broker.device, seed),
        None => SignalGenerator::new(&args.broker.device),
    };

    let mut publisher = TelemetryPublisher::new(
        Box::new(SyntheticSource::new(generator)),
        args.broker.topics(),
        args.period(),
    )
    .with_sink(Box::new(MqttSink::new(client.clone())));

    if let Some(path) = &args.log_jsonl {
        publisher = publisher.with_sink(Box::new(FileSink::new(path)?));
        info!("Appending records to {}", path.display());
    }

    info!("Emulator running at {} Hz, Ctrl+C to stop", args.hz);
    publisher.run(shutdown::token()).await?;

    if let Err(e) = client.disconnect().await {
        warn!("MQTT disconnect failed: {}", e);
    }
    if tokio::time::timeout(DISCONNECT_GRACE, driver).await.is_err() {
        driver_cancel.cancel();
    }

    info!("Emulator stopped");
    Ok(())
}
