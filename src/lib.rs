//! # Meshgate - HTTP bridge for a serial-attached Meshtastic radio
//!
//! Meshgate exposes a handful of JSON endpoints that proxy queries and text
//! messages to a Meshtastic device on a local serial port.
//!
//! | Method & Path      | Response                                                  |
//! |--------------------|-----------------------------------------------------------|
//! | `GET /`            | `{"message": ...}`                                        |
//! | `GET /nodes`       | `{"nodes": [{id, longName, shortName, lastHeard, batteryLevel}]}` |
//! | `POST /send/text`  | `{"status": "sent", "to": ..., "text": ...}`              |
//! | `GET /device/info` | `{"deviceInfo": ...}`                                     |
//! | `GET /channels`    | `{"channels": [...]}`                                     |
//!
//! Failures (no device, device errors) come back as `{"error": ...}` with
//! `200 OK`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshgate::api::{router, AppState};
//! use meshgate::config::Config;
//! use meshgate::connection::ConnectionManager;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load("config.toml").await?;
//!     config.apply_env();
//!
//!     let connection = ConnectionManager::initialize(&config.meshtastic).await;
//!     let app = router(AppState::new(connection));
//!     let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`api`] - axum router and request handlers
//! - [`connection`] - one-shot device connection and its state
//! - [`meshtastic`] - serial link, stream framing and node database
//! - [`config`] - TOML configuration and environment overrides
//! - [`protobuf`] - generated Meshtastic protobuf types
//! - [`logutil`] - log-safe rendering of untrusted text
//!
//! ```text
//! ┌─────────────────┐
//! │   HTTP API      │ ← axum handlers
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Connection    │ ← Connected(link) | Disconnected
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Meshtastic    │ ← serial + protobuf
//! └─────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod connection;
pub mod logutil;
pub mod meshtastic;
pub mod protobuf;
