//! WiFi Configuration Portal
//!
//! This library serves the web pages a device uses to get itself onto a
//! WiFi network: a scan endpoint that streams nearby access points as JSON,
//! a connect endpoint that applies new station credentials after a short
//! delay, a status endpoint the "connecting" page polls, and template pages
//! that show the current radio state.
//!
//! # Modules
//!
//! - [`cgi`] - Incremental request handlers and the driver that resumes them
//! - [`config`] - TOML configuration for the server, radio and soft AP
//! - [`connection`] - Connection attempt coordinator and its endpoints
//! - [`context`] - Shared portal state and the event loop
//! - [`driver`] - The radio abstraction the coordinators talk to
//! - [`error`] - Custom error types for the library
//! - [`mode`] - Radio mode and soft-AP channel endpoints
//! - [`nmcli`] - NetworkManager-backed driver
//! - [`scan`] - Scan coordinator and the streaming scan endpoint
//! - [`server`] - Axum router that adapts HTTP requests to the handlers
//! - [`sim`] - In-memory driver for demos and tests
//! - [`template`] - Page templates and WiFi tokens
//! - [`timer`] - One-shot timers delivered through the event loop
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use wifi_portal::{config::Config, event_channel, server, sim::SimDriver, WifiContext};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::default();
//! let (tx, rx) = event_channel();
//! let driver = Arc::new(SimDriver::new(tx.clone()));
//!
//! let ctx = WifiContext::new(driver, tx, config.wifi.clone());
//! tokio::spawn(ctx.clone().run(rx));
//!
//! server::run_server(ctx, &config.server).await
//! # }
//! ```

/// Continuation driver for handlers that produce a response in several steps.
/// Keeps per-connection state between invocations and handles early aborts.
pub mod cgi;

/// Configuration module for server, radio and access point settings.
/// Handles reading TOML config files and validating them.
pub mod config;

/// Connection attempt state machine: debounce, connect, watchdog and
/// restart into station mode.
pub mod connection;

/// Shared context owning both coordinators, plus the event loop.
pub mod context;

/// Radio driver trait and the value types that cross it.
pub mod driver;

/// Error module defining custom error types for the library.
/// Uses `thiserror` for ergonomic error handling.
pub mod error;

/// Endpoints that switch the radio mode and the soft-AP channel.
pub mod mode;

/// Driver backed by the `nmcli` command line tool.
pub mod nmcli;

/// Scan result cache and the JSON streaming endpoint.
pub mod scan;

/// Server module exposing the portal over HTTP.
/// Uses Axum to route requests into the incremental handlers.
pub mod server;

/// In-memory driver for `serve --simulate` and tests.
pub mod sim;

/// Tera pages with live WiFi state tokens.
pub mod template;

/// One-shot timers delivered through the event loop.
pub mod timer;

pub use connection::{ConnStatus, ConnectCoordinator, StatusReport};
pub use context::{event_channel, Event, WifiContext};
pub use driver::{AccessPointRecord, Credentials, WifiDriver, WifiMode};
pub use error::WifiPortalError;
pub use scan::{ScanCoordinator, ScanResult};
