//! Command-line arguments and dashboard settings

use clap::{Args, Parser, ValueEnum};
use m365_core::conditioning::ConditionerConfig;
use m365_core::topics::{DeviceTopics, DEFAULT_DEVICE_ID, DEFAULT_TOPIC_BASE};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Lowest publish rate the emulator accepts
pub const MIN_PUBLISH_HZ: f64 = 0.1;

/// Broker connection flags shared by the emulator and replayer
#[derive(Debug, Clone, Args)]
pub struct BrokerArgs {
    /// MQTT broker host
    #[arg(long, env = "M365_MQTT_HOST", default_value = "localhost")]
    pub host: String,

    /// MQTT broker port
    #[arg(long, env = "M365_MQTT_PORT", default_value_t = 1883)]
    pub port: u16,

    /// Device ID used in topics and records
    #[arg(long, env = "M365_DEVICE", default_value = DEFAULT_DEVICE_ID)]
    pub device: String,

    /// Base topic
    #[arg(long, env = "M365_TOPIC_BASE", default_value = DEFAULT_TOPIC_BASE)]
    pub topic_base: String,
}

impl BrokerArgs {
    pub fn topics(&self) -> DeviceTopics {
        DeviceTopics::new(&self.topic_base, &self.device)
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about = "M365 digital twin real-time MQTT emulator", long_about = None)]
pub struct EmulatorArgs {
    #[command(flatten)]
    pub broker: BrokerArgs,

    /// Publishing frequency in Hz (floored at 0.1)
    #[arg(long, env = "M365_HZ", default_value_t = 1.0)]
    pub hz: f64,

    /// Append every published record to this NDJSON file
    #[arg(long, env = "M365_LOG_JSONL", value_name = "FILE")]
    pub log_jsonl: Option<PathBuf>,

    /// Random seed for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,
}

impl EmulatorArgs {
    /// Tick period after applying the rate floor
    pub fn period(&self) -> Duration {
        publish_period(self.hz)
    }
}

/// Period for a publish rate, floored at [`MIN_PUBLISH_HZ`]
pub fn publish_period(hz: f64) -> Duration {
    let hz = if hz.is_finite() {
        hz.max(MIN_PUBLISH_HZ)
    } else {
        MIN_PUBLISH_HZ
    };
    Duration::from_secs_f64(1.0 / hz)
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Replay an M365 NDJSON log over MQTT", long_about = None)]
pub struct ReplayArgs {
    #[command(flatten)]
    pub broker: BrokerArgs,

    /// NDJSON log to replay
    #[arg(long, env = "M365_REPLAY_FILE", value_name = "FILE")]
    pub file: PathBuf,

    /// Fixed delay between publishes in milliseconds
    #[arg(long, env = "M365_REPLAY_DELAY_MS", default_value_t = 1000)]
    pub delay_ms: u64,
}

impl ReplayArgs {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about = "M365 digital twin dashboard backend", long_about = None)]
pub struct DashboardArgs {
    /// Address to serve the dashboard on
    #[arg(long, env = "M365_DASHBOARD_BIND", default_value = "0.0.0.0:9200")]
    pub bind: SocketAddr,

    /// Initial data source
    #[arg(long, env = "M365_SOURCE", value_enum, default_value_t = SourceKind::Demo)]
    pub source: SourceKind,

    /// NDJSON log for the demo source
    #[arg(long, env = "M365_DEMO_PATH", default_value = DEFAULT_DEMO_PATH)]
    pub demo_path: PathBuf,

    #[arg(long, env = "M365_INFLUX_URL", default_value = "http://localhost:8086")]
    pub influx_url: String,

    #[arg(long, env = "M365_INFLUX_TOKEN", default_value = "", hide_env_values = true)]
    pub influx_token: String,

    #[arg(long, env = "M365_INFLUX_ORG", default_value = "my-org")]
    pub influx_org: String,

    #[arg(long, env = "M365_INFLUX_BUCKET", default_value = "scooter")]
    pub influx_bucket: String,

    /// Device queried from InfluxDB
    #[arg(long, env = "M365_DEVICE", default_value = DEFAULT_DEVICE_ID)]
    pub device: String,

    #[arg(long, env = "M365_MQTT_HOST", default_value = "localhost")]
    pub mqtt_host: String,

    #[arg(long, env = "M365_MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    /// Topic filter for the live MQTT source
    #[arg(long, env = "M365_MQTT_TOPIC", default_value = "m365/#")]
    pub mqtt_topic: String,
}

impl DashboardArgs {
    /// Initial settings document; everything else keeps its default
    pub fn settings(&self) -> DashboardSettings {
        DashboardSettings {
            source: self.source,
            demo: DemoSettings {
                path: self.demo_path.clone(),
            },
            influx: InfluxSettings {
                url: self.influx_url.clone(),
                token: self.influx_token.clone(),
                org: self.influx_org.clone(),
                bucket: self.influx_bucket.clone(),
                device_id: self.device.clone(),
            },
            mqtt: MqttSettings {
                host: self.mqtt_host.clone(),
                port: self.mqtt_port,
                topic: self.mqtt_topic.clone(),
                ..MqttSettings::default()
            },
            ..DashboardSettings::default()
        }
        .clamped()
    }
}

// =============================================================================
// Dashboard settings
// =============================================================================

pub const DEFAULT_DEMO_PATH: &str = "logs/raw/m365_synthetic.jsonl";

/// Where the dashboard reads rows from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// NDJSON log file
    #[default]
    Demo,
    /// InfluxDB Flux query
    Influx,
    /// Live MQTT subscription
    Mqtt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    pub path: PathBuf,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DEMO_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxSettings {
    pub url: String,
    /// Accepted on input, never echoed back
    #[serde(skip_serializing)]
    pub token: String,
    pub org: String,
    pub bucket: String,
    pub device_id: String,
}

impl Default for InfluxSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            token: String::new(),
            org: "my-org".to_string(),
            bucket: "scooter".to_string(),
            device_id: DEFAULT_DEVICE_ID.to_string(),
        }
    }
}

/// Live subscription parameters. Any change restarts the listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub topic: String,
    /// Drop records stamped `fw_src = "synthetic"`
    pub ignore_synthetic: bool,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            topic: "m365/#".to_string(),
            ignore_synthetic: true,
        }
    }
}

/// Runtime-adjustable dashboard settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    pub source: SourceKind,
    /// Auto-refresh period (1..=30 s)
    pub refresh_secs: u64,
    /// Trailing data window (1..=120 min)
    pub window_minutes: u64,
    /// Speed conditioning
    pub filter: ConditionerConfig,
    pub demo: DemoSettings,
    pub influx: InfluxSettings,
    pub mqtt: MqttSettings,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            source: SourceKind::Demo,
            refresh_secs: 5,
            window_minutes: 15,
            filter: ConditionerConfig::default(),
            demo: DemoSettings::default(),
            influx: InfluxSettings::default(),
            mqtt: MqttSettings::default(),
        }
    }
}

impl DashboardSettings {
    /// Pull every tunable into its allowed range
    pub fn clamped(mut self) -> Self {
        let defaults = ConditionerConfig::default();

        self.refresh_secs = self.refresh_secs.clamp(1, 30);
        self.window_minutes = self.window_minutes.clamp(1, 120);

        let f = &mut self.filter;
        f.median_window = f.median_window.clamp(1, 15);
        f.max_speed_kmh = clamp_or(f.max_speed_kmh, 5.0, 80.0, defaults.max_speed_kmh);
        f.ema_alpha = clamp_or(f.ema_alpha, 0.05, 0.60, defaults.ema_alpha);
        f.pwm_zero_lock = clamp_or(f.pwm_zero_lock, 0.0, 300.0, defaults.pwm_zero_lock);
        f.stop_hold_secs = clamp_or(f.stop_hold_secs, 0.0, 2.0, defaults.stop_hold_secs);

        if self.mqtt.port == 0 {
            self.mqtt.port = MqttSettings::default().port;
        }
        self
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.window_minutes as i64)
    }
}

fn clamp_or(value: f64, lo: f64, hi: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(lo, hi)
    } else {
        fallback
    }
}
