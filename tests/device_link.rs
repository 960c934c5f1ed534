//! Drives `MeshtasticDevice` against a scripted radio on an in-memory byte stream.

use meshgate::meshtastic::stream::{encode_frame, StreamDecoder};
use meshgate::meshtastic::{DeviceError, DeviceSettings, MeshLink, MeshtasticDevice};
use meshgate::protobuf::meshtastic_generated as proto;
use prost::Message;
use proto::from_radio::PayloadVariant as FR;
use proto::to_radio::PayloadVariant as TR;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const LOCAL: u32 = 0x1122_3344;
const REMOTE: u32 = 0x5566_7788;

/// Host-to-radio bytes, shared between the device's writer and the radio.
#[derive(Clone, Default)]
struct Wire(Arc<Mutex<Vec<u8>>>);

impl Write for Wire {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Wire {
    fn to_radio(&self) -> Vec<proto::ToRadio> {
        let mut dec = StreamDecoder::new();
        dec.push(&self.0.lock().unwrap());
        let mut out = Vec::new();
        while let Some(frame) = dec.next_frame() {
            out.push(proto::ToRadio::decode(frame.as_slice()).unwrap());
        }
        out
    }
}

/// Radio side: answers `want_config_id` with a small node database.
struct ScriptedRadio {
    wire: Wire,
    seen: usize,
    decoder: StreamDecoder,
    outbox: VecDeque<u8>,
    answers_config: bool,
}

impl ScriptedRadio {
    fn new(wire: Wire, answers_config: bool) -> Self {
        ScriptedRadio {
            wire,
            seen: 0,
            decoder: StreamDecoder::new(),
            outbox: VecDeque::new(),
            answers_config,
        }
    }

    fn queue(&mut self, v: FR) {
        let msg = proto::FromRadio {
            id: 0,
            payload_variant: Some(v),
        };
        let frame = encode_frame(&msg.encode_to_vec()).unwrap();
        // Console noise between frames must be skipped by the host
        self.outbox.extend(b"INFO | boot\r\n");
        self.outbox.extend(frame);
    }

    fn config_dump(&mut self, id: u32) {
        self.queue(FR::MyInfo(proto::MyNodeInfo {
            my_node_num: LOCAL,
            ..Default::default()
        }));
        self.queue(FR::Metadata(proto::DeviceMetadata {
            firmware_version: "2.3.15.deb7c27".into(),
            ..Default::default()
        }));
        self.queue(FR::NodeInfo(proto::NodeInfo {
            num: LOCAL,
            user: Some(proto::User {
                id: "!11223344".into(),
                long_name: "Base Station".into(),
                short_name: "BASE".into(),
                hw_model: proto::HardwareModel::Rak4631 as i32,
                ..Default::default()
            }),
            ..Default::default()
        }));
        self.queue(FR::NodeInfo(proto::NodeInfo {
            num: REMOTE,
            user: Some(proto::User {
                id: "!55667788".into(),
                long_name: "Hilltop".into(),
                short_name: "HILL".into(),
                ..Default::default()
            }),
            last_heard: 1_700_000_000,
            ..Default::default()
        }));
        self.queue(FR::Channel(proto::Channel {
            index: 0,
            role: proto::channel::Role::Primary as i32,
            settings: Some(proto::ChannelSettings {
                name: "LongFast".into(),
                psk: vec![1u8].into(),
                ..Default::default()
            }),
        }));
        self.queue(FR::ConfigCompleteId(id));
    }
}

impl Read for ScriptedRadio {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let fresh = {
            let bytes = self.wire.0.lock().unwrap();
            let fresh = bytes[self.seen..].to_vec();
            self.seen = bytes.len();
            fresh
        };
        self.decoder.push(&fresh);
        while let Some(frame) = self.decoder.next_frame() {
            if let Ok(proto::ToRadio {
                payload_variant: Some(TR::WantConfigId(id)),
            }) = proto::ToRadio::decode(frame.as_slice())
            {
                if self.answers_config {
                    self.config_dump(id);
                }
            }
        }

        if self.outbox.is_empty() {
            std::thread::sleep(Duration::from_millis(5));
            return Err(std::io::ErrorKind::TimedOut.into());
        }
        let n = buf.len().min(self.outbox.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

fn settings() -> DeviceSettings {
    DeviceSettings {
        connect_timeout: Duration::from_secs(5),
        heartbeat_interval: None,
        ..Default::default()
    }
}

async fn connect(wire: &Wire, s: DeviceSettings) -> Result<MeshtasticDevice, DeviceError> {
    let radio = ScriptedRadio::new(wire.clone(), true);
    MeshtasticDevice::connect("/dev/ttyFAKE", Box::new(radio), Box::new(wire.clone()), s).await
}

fn sent_packets(wire: &Wire) -> Vec<proto::MeshPacket> {
    wire.to_radio()
        .into_iter()
        .filter_map(|m| match m.payload_variant {
            Some(TR::Packet(p)) => Some(p),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn handshake_loads_node_database() {
    let wire = Wire::default();
    let device = connect(&wire, settings()).await.unwrap();

    // Wake burst precedes the config request
    assert!(wire.0.lock().unwrap().starts_with(&[0xC3; 32]));

    assert_eq!(device.port_name(), "/dev/ttyFAKE");
    let summary = device.summary().unwrap();
    assert_eq!(summary.my_node.as_deref(), Some("!11223344"));
    assert_eq!(summary.node_count, 2);
    assert_eq!(summary.channel_count, 1);
    assert_eq!(summary.firmware_version.as_deref(), Some("2.3.15.deb7c27"));

    let nodes = device.nodes().unwrap();
    assert_eq!(nodes["!55667788"]["user"]["longName"], "Hilltop");
    assert_eq!(nodes["!55667788"]["lastHeard"], 1_700_000_000u32);

    let me = device.my_node_info().unwrap();
    assert_eq!(me["num"], LOCAL);
    assert_eq!(me["user"]["hwModel"], "RAK4631");

    let channels = device.channels().unwrap();
    assert_eq!(channels[0]["settings"]["name"], "LongFast");
    assert!(channels[0]["settings"].get("psk").is_none());
}

#[tokio::test]
async fn send_text_writes_one_text_packet() {
    let wire = Wire::default();
    let device = connect(&wire, settings()).await.unwrap();

    device.send_text("hello mesh", "^all").unwrap();
    device.send_text("to hill", "!55667788").unwrap();
    device.send_text("to me", "^local").unwrap();

    let packets = sent_packets(&wire);
    assert_eq!(packets.len(), 3);
    let to: Vec<u32> = packets.iter().map(|p| p.to).collect();
    assert_eq!(to, vec![0xFFFF_FFFF, REMOTE, LOCAL]);

    let first = &packets[0];
    assert_eq!(first.hop_limit, 3);
    assert_eq!(first.channel, 0);
    assert_ne!(first.id, 0);
    match &first.payload_variant {
        Some(proto::mesh_packet::PayloadVariant::Decoded(data)) => {
            assert_eq!(data.portnum, proto::PortNum::TextMessageApp as i32);
            assert_eq!(&data.payload[..], b"hello mesh");
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[tokio::test]
async fn send_text_resolves_user_ids() {
    let wire = Wire::default();
    let device = connect(&wire, settings()).await.unwrap();

    let err = device.send_text("x", "ghost").unwrap_err();
    assert_eq!(err.to_string(), "NodeId ghost not found in DB");
    assert!(matches!(
        device.send_text("x", "!zz"),
        Err(DeviceError::InvalidDestination(_))
    ));
    assert!(sent_packets(&wire).is_empty());
}

#[tokio::test]
async fn oversized_text_is_refused() {
    let wire = Wire::default();
    let device = connect(&wire, settings()).await.unwrap();

    let text = "a".repeat(234);
    assert!(matches!(
        device.send_text(&text, "^all"),
        Err(DeviceError::PayloadTooBig(234))
    ));
    device.send_text(&"a".repeat(233), "^all").unwrap();
    assert_eq!(sent_packets(&wire).len(), 1);
}

#[tokio::test]
async fn silent_radio_times_out() {
    let wire = Wire::default();
    let radio = ScriptedRadio::new(wire.clone(), false);
    let s = DeviceSettings {
        connect_timeout: Duration::from_millis(300),
        ..settings()
    };
    let result =
        MeshtasticDevice::connect("/dev/ttyFAKE", Box::new(radio), Box::new(wire.clone()), s)
            .await;
    assert!(matches!(result, Err(DeviceError::HandshakeTimeout(_))));
}

#[tokio::test]
async fn heartbeats_are_sent_while_idle() {
    let wire = Wire::default();
    let s = DeviceSettings {
        heartbeat_interval: Some(Duration::from_millis(50)),
        ..settings()
    };
    let _device = connect(&wire, s).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(wire
        .to_radio()
        .iter()
        .any(|m| matches!(m.payload_variant, Some(TR::Heartbeat(_)))));
}

#[tokio::test]
async fn drop_sends_disconnect() {
    let wire = Wire::default();
    let device = connect(&wire, settings()).await.unwrap();
    drop(device);
    let last = wire.to_radio().pop().unwrap();
    assert!(matches!(last.payload_variant, Some(TR::Disconnect(true))));
}
