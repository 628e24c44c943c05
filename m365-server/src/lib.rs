//! M365 Digital Twin Server Library
//!
//! Transport, publishing and dashboard components shared by the three
//! binaries and exposed for integration testing.

pub mod api;
pub mod buffer;
pub mod config;
pub mod influx;
pub mod logging;
pub mod mqtt;
pub mod publisher;
pub mod replay;
pub mod shutdown;
pub mod sinks;
pub mod state;
pub mod view;
pub mod web_ui;
