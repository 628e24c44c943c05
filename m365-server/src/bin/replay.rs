//! Replay a recorded NDJSON log over MQTT

use anyhow::{Context, Result};
use clap::Parser;
use m365_server::config::ReplayArgs;
use m365_server::mqtt::{self, BrokerConfig};
use m365_server::replay::LogReplayer;
use m365_server::sinks::MqttSink;
use m365_server::{logging, shutdown};
use m365_sources::JsonlReader;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();
    let args = ReplayArgs::parse();

    let reader = JsonlReader::open(&args.file)?;

    let broker = BrokerConfig::unique(&args.broker.host, args.broker.port, "m365-replay");
    let connection = mqtt::connect(&broker)
        .await
        .context("MQTT connection failed")?;
    let driver_cancel = CancellationToken::new();
    let (client, driver) = connection.spawn(driver_cancel.clone());

    info!(
        "Replaying {} with {} ms between messages",
        args.file.display(),
        args.delay_ms
    );
    let replayer = LogReplayer::new(args.broker.topics(), args.delay());
    let mut sink = MqttSink::new(client.clone());
    let summary = replayer
        .replay(reader, &mut sink, &shutdown::token())
        .await?;

    if let Err(e) = client.disconnect().await {
        warn!("MQTT disconnect failed: {}", e);
    }
    if tokio::time::timeout(Duration::from_secs(2), driver).await.is_err() {
        driver_cancel.cancel();
    }

    info!(
        "Done: {} telemetry, {} markers, {} skipped, {} failed",
        summary.telemetry, summary.markers, summary.skipped, summary.failed
    );
    Ok(())
}
