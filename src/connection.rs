//! Process-wide device connection.
//!
//! One connection attempt is made at startup. Whatever the outcome, the
//! resulting [`ConnectionManager`] is handed to the HTTP layer and never
//! changes afterwards: there is no reconnect, close or retry.

use crate::config::{port_disabled, MeshtasticConfig, PORT_DISABLED};
use crate::meshtastic::{DeviceError, DeviceSettings, MeshLink, MeshtasticDevice};
use log::{info, warn};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

#[derive(Clone)]
pub enum ConnectionState {
    Disconnected,
    Connected(Arc<dyn MeshLink>),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("Disconnected"),
            ConnectionState::Connected(_) => f.write_str("Connected(..)"),
        }
    }
}

#[derive(Debug)]
pub struct ConnectionManager {
    port: String,
    state: ConnectionState,
}

impl ConnectionManager {
    /// Connect to the configured serial device, or start disconnected.
    pub async fn initialize(config: &MeshtasticConfig) -> Self {
        let settings = DeviceSettings::from(config);
        Self::initialize_with(&config.port, move |port| async move {
            let device = MeshtasticDevice::open(&port, settings).await?;
            Ok::<_, DeviceError>(Arc::new(device) as Arc<dyn MeshLink>)
        })
        .await
    }

    /// Same policy as [`initialize`](Self::initialize) with a caller-supplied
    /// opener. The opener runs at most once and only for a real port.
    pub async fn initialize_with<F, Fut>(port_config: &str, open: F) -> Self
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Arc<dyn MeshLink>, DeviceError>>,
    {
        let port = port_config.trim().to_string();
        if port_disabled(&port) {
            info!("SERIAL_PORT not set or set to 'none'; Meshtastic interface disabled");
            return Self::disconnected(&port);
        }

        info!("Attempting to open Meshtastic device on {}", port);
        match open(port.clone()).await {
            Ok(link) => {
                info!("Connected to Meshtastic device on {}", port);
                ConnectionManager {
                    port,
                    state: ConnectionState::Connected(link),
                }
            }
            Err(e) => {
                warn!(
                    "Failed to connect to Meshtastic device on {}: {} (continuing without device)",
                    port, e
                );
                Self::disconnected(&port)
            }
        }
    }

    pub fn disconnected(port: &str) -> Self {
        ConnectionManager {
            port: port.trim().to_string(),
            state: ConnectionState::Disconnected,
        }
    }

    /// Wrap an already-established link.
    pub fn connected(port: &str, link: Arc<dyn MeshLink>) -> Self {
        ConnectionManager {
            port: port.trim().to_string(),
            state: ConnectionState::Connected(link),
        }
    }

    pub fn current(&self) -> &ConnectionState {
        &self.state
    }

    /// Configured port as shown to clients; `none` when it was left empty.
    pub fn port(&self) -> &str {
        if self.port.is_empty() {
            PORT_DISABLED
        } else {
            &self.port
        }
    }

    pub fn not_connected_message(&self) -> String {
        format!("Device not connected on {}", self.port())
    }
}
