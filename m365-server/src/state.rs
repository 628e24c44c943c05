//! Application state management
//!
//! All mutable dashboard state lives in one [`DashboardSession`]: the demo
//! log cache and, in live MQTT mode, the listener plus its rolling buffer.
//! Replacing the settings tears down whatever the new settings invalidate.

use crate::buffer::{RollingBuffer, LIVE_BUFFER_CAPACITY};
use crate::config::{DashboardSettings, MqttSettings, SourceKind};
use crate::influx::{InfluxClient, InfluxError};
use crate::mqtt::LiveListener;
use crate::view::DashboardView;
use chrono::Utc;
use m365_core::model::TelemetryRow;
use m365_core::soc::SocCurve;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// How long a loaded demo log is reused
pub const DEMO_CACHE_TTL: Duration = Duration::from_secs(60);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<RwLock<DashboardSettings>>,
    pub session: Arc<Mutex<DashboardSession>>,
    pub soc_curve: Arc<SocCurve>,
    influx: InfluxClient,
}

impl AppState {
    pub fn new(settings: DashboardSettings) -> Self {
        Self {
            settings: Arc::new(RwLock::new(settings.clamped())),
            session: Arc::new(Mutex::new(DashboardSession::default())),
            soc_curve: Arc::new(SocCurve::default()),
            influx: InfluxClient::new(),
        }
    }

    pub async fn settings(&self) -> DashboardSettings {
        self.settings.read().await.clone()
    }

    /// Replace the settings, releasing live resources they invalidate.
    ///
    /// The InfluxDB token is never serialized, so an empty token keeps the
    /// current one.
    pub async fn update_settings(&self, new: DashboardSettings) -> DashboardSettings {
        let mut new = new.clamped();
        let mut settings = self.settings.write().await;
        if new.influx.token.is_empty() {
            new.influx.token = settings.influx.token.clone();
        }
        self.session.lock().await.reconcile(&new);
        *settings = new.clone();
        new
    }

    /// Run one refresh cycle against the configured source
    pub async fn refresh(&self) -> DashboardView {
        let settings = self.settings().await;

        let rows = match settings.source {
            SourceKind::Demo => self.demo_rows(&settings.demo.path).await,
            SourceKind::Influx => self
                .influx
                .query(&settings.influx, settings.window_minutes)
                .await
                .map(|rows| (rows, None))
                .map_err(|e| {
                    if matches!(e, InfluxError::Disabled) {
                        e.to_string()
                    } else {
                        format!("InfluxDB error: {}", e)
                    }
                }),
            SourceKind::Mqtt => self.session.lock().await.live_rows(&settings),
        };

        match rows {
            Ok((rows, notice)) => {
                let view =
                    DashboardView::build(settings.source, rows, &settings.filter, &self.soc_curve);
                match notice {
                    Some(notice) if view.row_count > 0 => view.with_notice(notice),
                    Some(notice) => DashboardView::empty(settings.source, notice),
                    None => view,
                }
            }
            Err(message) => {
                tracing::warn!("Dashboard source error: {}", message);
                DashboardView::empty(settings.source, message)
            }
        }
    }

    /// Demo rows from the cache, reading the file off the async runtime
    /// when the cache is stale
    async fn demo_rows(&self, path: &Path) -> SourceRows {
        if let Some(rows) = self.session.lock().await.cached_demo(path) {
            return Ok((rows, None));
        }

        let owned = path.to_path_buf();
        let rows = tokio::task::spawn_blocking(move || m365_sources::load_rows(owned))
            .await
            .map_err(|e| format!("JSONL error: {}", e))?
            .map_err(|e| format!("JSONL error: {:#}", e))?;

        self.session.lock().await.store_demo(path, rows.clone());
        Ok((rows, None))
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(DashboardSettings::default())
    }
}

/// Rows for one refresh plus an optional notice
type SourceRows = Result<(Vec<TelemetryRow>, Option<String>), String>;

struct DemoCache {
    path: PathBuf,
    loaded_at: Instant,
    rows: Vec<TelemetryRow>,
}

struct LiveSession {
    listener: LiveListener,
    buffer: RollingBuffer<TelemetryRow>,
}

/// Per-dashboard mutable state
#[derive(Default)]
pub struct DashboardSession {
    demo: Option<DemoCache>,
    live: Option<LiveSession>,
}

impl DashboardSession {
    /// Drop state that no longer matches `settings`
    pub fn reconcile(&mut self, settings: &DashboardSettings) {
        let keep_live = settings.source == SourceKind::Mqtt
            && self
                .live
                .as_ref()
                .is_some_and(|live| live.listener.settings() == &settings.mqtt);
        if !keep_live {
            self.stop_live();
        }

        if self
            .demo
            .as_ref()
            .is_some_and(|cache| cache.path != settings.demo.path)
        {
            self.demo = None;
        }
    }

    pub fn stop_live(&mut self) {
        if let Some(live) = self.live.take() {
            live.listener.shutdown();
            tracing::info!("Live MQTT session torn down");
        }
    }

    pub fn live_buffer_len(&self) -> usize {
        self.live.as_ref().map_or(0, |live| live.buffer.len())
    }

    fn cached_demo(&self, path: &Path) -> Option<Vec<TelemetryRow>> {
        self.demo
            .as_ref()
            .filter(|c| c.path == path && c.loaded_at.elapsed() < DEMO_CACHE_TTL)
            .map(|c| c.rows.clone())
    }

    fn store_demo(&mut self, path: &Path, rows: Vec<TelemetryRow>) {
        self.demo = Some(DemoCache {
            path: path.to_path_buf(),
            loaded_at: Instant::now(),
            rows,
        });
    }

    /// Install `listener` as the live session with an empty buffer
    pub fn attach_live(&mut self, listener: LiveListener) {
        self.stop_live();
        self.live = Some(LiveSession {
            listener,
            buffer: RollingBuffer::new(LIVE_BUFFER_CAPACITY),
        });
    }

    fn live_rows(&mut self, settings: &DashboardSettings) -> SourceRows {
        let live = self.ensure_live(&settings.mqtt);

        let incoming = live.listener.drain();
        let evicted = live.buffer.extend(incoming);
        if evicted > 0 {
            tracing::debug!("Live buffer full, evicted {} oldest rows", evicted);
        }

        let since = Utc::now() - settings.window();
        let rows: Vec<TelemetryRow> = live
            .buffer
            .iter()
            .filter(|row| row.ts >= since)
            .cloned()
            .collect();

        let notice = live
            .listener
            .last_error()
            .map(|e| format!("MQTT error: {}", e));
        Ok((rows, notice))
    }

    fn ensure_live(&mut self, mqtt: &MqttSettings) -> &mut LiveSession {
        if self
            .live
            .as_ref()
            .is_some_and(|live| live.listener.settings() != mqtt || !live.listener.is_running())
        {
            self.stop_live();
        }

        self.live.get_or_insert_with(|| LiveSession {
            listener: LiveListener::spawn(mqtt.clone()),
            buffer: RollingBuffer::new(LIVE_BUFFER_CAPACITY),
        })
    }
}
