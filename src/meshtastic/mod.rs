//! # Meshtastic Device Communication Module
//!
//! Talks to a Meshtastic radio over its serial protobuf API and keeps a live
//! copy of the radio's node database.
//!
//! ## Link lifecycle
//!
//! 1. Open the serial port (8N1), raise DTR/RTS and drop buffered boot text.
//! 2. Send a burst of wake bytes so the firmware switches to protobuf mode.
//! 3. Start a reader thread that decodes `FromRadio` frames into [`state::MeshState`].
//! 4. Request the configuration dump (`want_config_id`) and wait until the
//!    radio answers with the matching `config_complete_id`.
//!
//! After that the device is ready: [`MeshLink`] reads are served from the
//! in-memory state and `send_text` writes one `ToRadio` frame.
//!
//! ```rust,no_run
//! use meshgate::meshtastic::{DeviceSettings, MeshLink, MeshtasticDevice};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let device = MeshtasticDevice::open("/dev/ttyUSB0", DeviceSettings::default()).await?;
//!     device.send_text("hello mesh", "^all")?;
//!     println!("{}", serde_json::Value::Object(device.nodes()?));
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```toml
//! [meshtastic]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! connect_timeout_secs = 30
//! hop_limit = 3
//! heartbeat_interval_secs = 300
//! ```

pub mod destination;
pub mod state;
pub mod stream;
pub mod view;

use crate::config::MeshtasticConfig;
use crate::logutil::{hex_snippet, preview};
use crate::protobuf::meshtastic_generated as proto;
use bytes::Bytes;
use destination::{node_id, Destination};
use log::{debug, info, trace, warn};
use prost::Message;
use serde::Serialize;
use serde_json::Value;
use state::MeshState;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;

/// Largest text payload the firmware will carry in a single packet.
pub const DATA_PAYLOAD_LEN: usize = 233;

/// Node database keyed by node id (`!xxxxxxxx` or the announced user id).
pub type NodeTable = serde_json::Map<String, Value>;

pub type PortReader = Box<dyn Read + Send>;
pub type PortWriter = Box<dyn Write + Send>;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Failed to open serial port {port}: {reason}")]
    Open { port: String, reason: String },
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Timed out after {0:?} waiting for device configuration")]
    HandshakeTimeout(Duration),
    #[error("Encoded frame too large ({0} bytes)")]
    FrameTooLarge(usize),
    #[error("Data payload too big ({0} bytes, max 233)")]
    PayloadTooBig(usize),
    #[error("Invalid destination '{0}'")]
    InvalidDestination(String),
    #[error("NodeId {0} not found in DB")]
    UnknownNode(String),
    #[error("Local node number not yet known")]
    LocalNodeUnknown,
    #[error("Serial support not compiled in")]
    Unsupported,
    #[error("Device state lock poisoned")]
    Poisoned,
}

/// The four operations the HTTP layer needs from a radio.
///
/// `MeshtasticDevice` is the real implementation; tests provide fakes.
pub trait MeshLink: Send + Sync {
    fn nodes(&self) -> Result<NodeTable, DeviceError>;
    fn send_text(&self, text: &str, destination: &str) -> Result<(), DeviceError>;
    fn my_node_info(&self) -> Result<Value, DeviceError>;
    fn channels(&self) -> Result<Value, DeviceError>;
}

#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub baud_rate: u32,
    /// How long to wait for the configuration dump after opening.
    pub connect_timeout: Duration,
    pub hop_limit: u32,
    /// `None` disables keepalive heartbeats.
    pub heartbeat_interval: Option<Duration>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            connect_timeout: Duration::from_secs(30),
            hop_limit: 3,
            heartbeat_interval: Some(Duration::from_secs(300)),
        }
    }
}

impl From<&MeshtasticConfig> for DeviceSettings {
    fn from(cfg: &MeshtasticConfig) -> Self {
        Self {
            baud_rate: cfg.baud_rate,
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            hop_limit: cfg.hop_limit,
            heartbeat_interval: match cfg.heartbeat_interval_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

/// Point-in-time counters, used by the smoke test.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub port: String,
    pub my_node: Option<String>,
    pub node_count: usize,
    pub channel_count: usize,
    pub firmware_version: Option<String>,
    pub frames_seen: u64,
}

struct Shared {
    state: Mutex<MeshState>,
    writer: Mutex<PortWriter>,
    stop: AtomicBool,
}

impl Shared {
    fn state(&self) -> Result<MutexGuard<'_, MeshState>, DeviceError> {
        self.state.lock().map_err(|_| DeviceError::Poisoned)
    }

    fn write_raw(&self, bytes: &[u8]) -> Result<(), DeviceError> {
        let mut w = self.writer.lock().map_err(|_| DeviceError::Poisoned)?;
        w.write_all(bytes)?;
        w.flush()?;
        Ok(())
    }

    fn send_to_radio(&self, msg: &proto::ToRadio) -> Result<(), DeviceError> {
        let payload = msg.encode_to_vec();
        let frame =
            stream::encode_frame(&payload).ok_or(DeviceError::FrameTooLarge(payload.len()))?;
        self.write_raw(&frame)?;
        trace!("ToRadio {} bytes: {}", payload.len(), hex_snippet(&payload, 48));
        Ok(())
    }
}

/// Represents a connection to a Meshtastic device
pub struct MeshtasticDevice {
    port_name: String,
    settings: DeviceSettings,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
}

impl MeshtasticDevice {
    /// Open the serial port and complete the configuration handshake.
    pub async fn open(port_name: &str, settings: DeviceSettings) -> Result<Self, DeviceError> {
        info!(
            "Initializing Meshtastic device on {} at {} baud",
            port_name, settings.baud_rate
        );
        let (reader, writer) = open_serial(port_name, settings.baud_rate).await?;
        Self::connect(port_name, reader, writer, settings).await
    }

    /// Run the handshake over an already-open byte stream.
    pub async fn connect(
        port_name: &str,
        reader: PortReader,
        writer: PortWriter,
        settings: DeviceSettings,
    ) -> Result<Self, DeviceError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(MeshState::new()),
            writer: Mutex::new(writer),
            stop: AtomicBool::new(false),
        });

        // A run of START2 bytes knocks the firmware out of console mode
        shared.write_raw(&[stream::START2; 32])?;
        sleep(Duration::from_millis(100)).await;

        let reader_shared = shared.clone();
        let heartbeat = settings.heartbeat_interval;
        let handle = std::thread::Builder::new()
            .name("meshtastic-reader".into())
            .spawn(move || reader_loop(reader, reader_shared, heartbeat))?;

        let device = MeshtasticDevice {
            port_name: port_name.to_string(),
            settings,
            shared,
            reader: Some(handle),
        };

        let request_id = loop {
            let id: u32 = rand::random();
            if id != 0 {
                break id;
            }
        };
        debug!("Requesting config with want_config_id=0x{:08x}", request_id);
        device.shared.send_to_radio(&proto::ToRadio {
            payload_variant: Some(proto::to_radio::PayloadVariant::WantConfigId(request_id)),
        })?;

        let deadline = Instant::now() + device.settings.connect_timeout;
        loop {
            let done = device.shared.state()?.config_complete(request_id);
            if done {
                break;
            }
            if Instant::now() >= deadline {
                return Err(DeviceError::HandshakeTimeout(device.settings.connect_timeout));
            }
            sleep(Duration::from_millis(50)).await;
        }

        let summary = device.summary()?;
        info!(
            "Meshtastic device ready on {}: local node {}, {} nodes, {} channels",
            device.port_name,
            summary.my_node.as_deref().unwrap_or("?"),
            summary.node_count,
            summary.channel_count
        );
        Ok(device)
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn summary(&self) -> Result<DeviceSummary, DeviceError> {
        let st = self.shared.state()?;
        Ok(DeviceSummary {
            port: self.port_name.clone(),
            my_node: st.my_node_num().map(node_id),
            node_count: st.node_count(),
            channel_count: st.channel_count(),
            firmware_version: st.firmware_version().map(str::to_string),
            frames_seen: st.frames_seen(),
        })
    }
}

impl MeshLink for MeshtasticDevice {
    fn nodes(&self) -> Result<NodeTable, DeviceError> {
        Ok(self.shared.state()?.node_table())
    }

    fn send_text(&self, text: &str, destination: &str) -> Result<(), DeviceError> {
        use proto::mesh_packet::PayloadVariant as MPPayload;
        use proto::to_radio::PayloadVariant as TRPayload;

        if text.len() > DATA_PAYLOAD_LEN {
            return Err(DeviceError::PayloadTooBig(text.len()));
        }
        let dest: Destination = destination.parse()?;
        let to = self.shared.state()?.resolve(&dest)?;
        let id = loop {
            let id: u32 = rand::random();
            if id != 0 {
                break id;
            }
        };

        let pkt = proto::MeshPacket {
            to,
            channel: 0,
            id,
            hop_limit: self.settings.hop_limit,
            want_ack: false,
            payload_variant: Some(MPPayload::Decoded(proto::Data {
                portnum: proto::PortNum::TextMessageApp as i32,
                payload: Bytes::copy_from_slice(text.as_bytes()),
                ..Default::default()
            })),
            ..Default::default()
        };
        self.shared.send_to_radio(&proto::ToRadio {
            payload_variant: Some(TRPayload::Packet(pkt)),
        })?;
        debug!(
            "Sent text id=0x{:08x} to {} ({}): '{}'",
            id,
            dest,
            node_id(to),
            preview(text, 80)
        );
        Ok(())
    }

    fn my_node_info(&self) -> Result<Value, DeviceError> {
        Ok(self.shared.state()?.my_node_info())
    }

    fn channels(&self) -> Result<Value, DeviceError> {
        Ok(self.shared.state()?.channel_list())
    }
}

impl Drop for MeshtasticDevice {
    fn drop(&mut self) {
        let bye = proto::ToRadio {
            payload_variant: Some(proto::to_radio::PayloadVariant::Disconnect(true)),
        };
        if let Err(e) = self.shared.send_to_radio(&bye) {
            debug!("Disconnect notice not sent to {}: {}", self.port_name, e);
        }
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        info!("Disconnected from Meshtastic device on {}", self.port_name());
    }
}

fn reader_loop(mut port: PortReader, shared: Arc<Shared>, heartbeat: Option<Duration>) {
    use std::io::ErrorKind;

    debug!("Meshtastic reader started");
    let mut decoder = stream::StreamDecoder::new();
    let mut buf = [0u8; 1024];
    let mut last_heartbeat = Instant::now();
    let mut backoff = ReadBackoff::default();

    while !shared.stop.load(Ordering::Relaxed) {
        match port.read(&mut buf) {
            Ok(0) => std::thread::sleep(Duration::from_millis(10)),
            Ok(n) => {
                trace!("RAW {} bytes: {}", n, hex_snippet(&buf[..n], 64));
                decoder.push(&buf[..n]);
                while let Some(frame) = decoder.next_frame() {
                    let Ok(mut st) = shared.state() else {
                        warn!("Device state lock poisoned; reader exiting");
                        return;
                    };
                    if let Err(e) = st.apply_frame(&frame) {
                        debug!("Undecodable FromRadio ({} bytes): {}", frame.len(), e);
                    }
                }
            }
            Err(ref e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
            Err(ref e) if e.kind() == ErrorKind::Interrupted => {
                debug!("Serial read interrupted (EINTR)");
            }
            Err(e) => {
                let (first, delay) = backoff.failed();
                if first {
                    warn!("Serial read error (continuing, further errors at debug): {}", e);
                } else {
                    debug!("Serial read error #{}: {}", backoff.failures(), e);
                }
                // Sleep in slices so a dropped device still stops promptly
                let until = Instant::now() + delay;
                while Instant::now() < until && !shared.stop.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(50));
                }
                continue;
            }
        }
        if backoff.recovered() {
            info!("Serial reads recovered");
        }

        if let Some(interval) = heartbeat {
            if last_heartbeat.elapsed() >= interval {
                let nonce = (chrono::Utc::now().timestamp_millis() & 0xffff) as u32;
                let msg = proto::ToRadio {
                    payload_variant: Some(proto::to_radio::PayloadVariant::Heartbeat(
                        proto::Heartbeat { nonce },
                    )),
                };
                if let Err(e) = shared.send_to_radio(&msg) {
                    warn!("Heartbeat failed: {}", e);
                }
                last_heartbeat = Instant::now();
            }
        }
    }
    debug!(
        "Meshtastic reader stopped ({} console bytes skipped)",
        decoder.skipped()
    );
}

/// Tracks a run of consecutive read errors, e.g. after the USB device is
/// unplugged. The retry delay doubles from 100 ms up to 5 s.
#[derive(Debug, Default)]
struct ReadBackoff {
    failures: u32,
}

impl ReadBackoff {
    const BASE: Duration = Duration::from_millis(100);
    const MAX: Duration = Duration::from_secs(5);

    /// Record a failure; returns whether it starts a new run, and how long to wait.
    fn failed(&mut self) -> (bool, Duration) {
        self.failures = self.failures.saturating_add(1);
        let shift = (self.failures - 1).min(6);
        let delay = Self::BASE.saturating_mul(1 << shift).min(Self::MAX);
        (self.failures == 1, delay)
    }

    fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a good read; true when it ends a run of failures.
    fn recovered(&mut self) -> bool {
        std::mem::take(&mut self.failures) > 0
    }
}

#[cfg(feature = "serial")]
struct SerialIo(Box<dyn serialport::SerialPort>);

#[cfg(feature = "serial")]
impl Read for SerialIo {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

#[cfg(feature = "serial")]
impl Write for SerialIo {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

#[cfg(feature = "serial")]
async fn open_serial(port_name: &str, baud_rate: u32) -> Result<(PortReader, PortWriter), DeviceError> {
    let open_err = |e: serialport::Error| DeviceError::Open {
        port: port_name.to_string(),
        reason: e.to_string(),
    };

    let mut builder = serialport::new(port_name, baud_rate).timeout(Duration::from_millis(100));
    // Some USB serial adapters need explicit settings
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);
    }
    let mut port = builder.open().map_err(open_err)?;
    // Toggle DTR/RTS to ensure the device wakes (common for ESP32 based boards)
    let _ = port.write_data_terminal_ready(true);
    let _ = port.write_request_to_send(true);
    sleep(Duration::from_millis(150)).await;

    // Clear any buffered startup text
    let mut purge_buf = [0u8; 512];
    if let Ok(available) = port.bytes_to_read() {
        if available > 0 {
            let _ = port.read(&mut purge_buf);
        }
    }

    let reader = port.try_clone().map_err(open_err)?;
    debug!("Serial port {} initialized", port_name);
    Ok((Box::new(SerialIo(reader)), Box::new(SerialIo(port))))
}

#[cfg(not(feature = "serial"))]
async fn open_serial(
    _port_name: &str,
    _baud_rate: u32,
) -> Result<(PortReader, PortWriter), DeviceError> {
    warn!("Serial support not compiled in");
    Err(DeviceError::Unsupported)
}
