//! Live view of the mesh as reported by the attached radio.
//!
//! The reader thread feeds every decoded `FromRadio` into [`MeshState::apply`];
//! HTTP handlers read JSON snapshots out of it. Nothing here touches the port.

use super::destination::{node_id, Destination, BROADCAST_NUM};
use super::view::{table_key, ChannelView, NodeView};
use super::{DeviceError, NodeTable};
use crate::logutil::preview;
use crate::protobuf::meshtastic_generated as proto;
use bytes::Bytes;
use log::{debug, info, trace, warn};
use prost::Message;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct MeshState {
    my_node_num: Option<u32>,
    nodes: BTreeMap<u32, proto::NodeInfo>,
    channels: BTreeMap<i32, proto::Channel>,
    metadata: Option<proto::DeviceMetadata>,
    config_complete_id: Option<u32>,
    frames: u64,
}

impl MeshState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one stream payload and apply it.
    pub fn apply_frame(&mut self, frame: &[u8]) -> Result<(), prost::DecodeError> {
        let msg = proto::FromRadio::decode(Bytes::copy_from_slice(frame))?;
        self.apply(msg);
        Ok(())
    }

    pub fn apply(&mut self, msg: proto::FromRadio) {
        use proto::from_radio::PayloadVariant as FR;
        self.frames += 1;
        let Some(variant) = msg.payload_variant else {
            trace!("FromRadio id={} without payload", msg.id);
            return;
        };
        match variant {
            FR::MyInfo(info) => {
                debug!("Local node is {}", node_id(info.my_node_num));
                self.my_node_num = Some(info.my_node_num);
            }
            FR::NodeInfo(n) => {
                trace!("Node DB entry {}", node_id(n.num));
                self.nodes.insert(n.num, n);
            }
            FR::Channel(c) => {
                self.channels.insert(c.index, c);
            }
            FR::Metadata(m) => {
                debug!("Firmware {}", m.firmware_version);
                self.metadata = Some(m);
            }
            FR::ConfigCompleteId(id) => {
                debug!(
                    "Config complete (id=0x{:08x}, {} nodes, {} channels)",
                    id,
                    self.nodes.len(),
                    self.channels.len()
                );
                self.config_complete_id = Some(id);
            }
            FR::Packet(pkt) => self.apply_packet(pkt),
            FR::LogRecord(rec) => {
                debug!("Device log [{}] {}", rec.source, preview(&rec.message, 200));
            }
            FR::QueueStatus(qs) => {
                trace!(
                    "Queue status res={} free={}/{} id={}",
                    qs.res,
                    qs.free,
                    qs.maxlen,
                    qs.mesh_packet_id
                );
            }
            FR::Rebooted(_) => {
                warn!("Device reported a reboot; node database may be stale until it resyncs");
            }
        }
    }

    fn apply_packet(&mut self, pkt: proto::MeshPacket) {
        use proto::mesh_packet::PayloadVariant as MP;
        use proto::PortNum;

        let heard = if pkt.rx_time != 0 {
            pkt.rx_time
        } else {
            chrono::Utc::now().timestamp() as u32
        };
        let node = self.nodes.entry(pkt.from).or_insert_with(|| proto::NodeInfo {
            num: pkt.from,
            ..Default::default()
        });
        node.last_heard = heard;
        if pkt.rx_snr != 0.0 {
            node.snr = pkt.rx_snr;
        }
        if pkt.hop_start != 0 && pkt.hop_start >= pkt.hop_limit {
            node.hops_away = Some(pkt.hop_start - pkt.hop_limit);
        }
        node.via_mqtt = pkt.via_mqtt;

        let Some(MP::Decoded(data)) = pkt.payload_variant else {
            trace!("Encrypted packet from {}", node_id(pkt.from));
            return;
        };
        let port = PortNum::try_from(data.portnum).unwrap_or(PortNum::UnknownApp);
        match port {
            PortNum::NodeinfoApp => match proto::User::decode(data.payload.clone()) {
                Ok(user) => {
                    debug!(
                        "User update {} '{}' ({})",
                        node_id(pkt.from),
                        preview(&user.long_name, 40),
                        preview(&user.short_name, 8)
                    );
                    node.user = Some(user);
                }
                Err(e) => debug!("Bad NODEINFO payload from {}: {}", node_id(pkt.from), e),
            },
            PortNum::TelemetryApp => match proto::Telemetry::decode(data.payload.clone()) {
                Ok(proto::Telemetry {
                    variant: Some(proto::telemetry::Variant::DeviceMetrics(dm)),
                    ..
                }) => {
                    node.device_metrics = Some(dm);
                }
                Ok(_) => trace!("Non-device telemetry from {}", node_id(pkt.from)),
                Err(e) => debug!("Bad TELEMETRY payload from {}: {}", node_id(pkt.from), e),
            },
            PortNum::PositionApp => match proto::Position::decode(data.payload.clone()) {
                Ok(pos) => node.position = Some(pos),
                Err(e) => debug!("Bad POSITION payload from {}: {}", node_id(pkt.from), e),
            },
            PortNum::TextMessageApp => {
                let text = String::from_utf8_lossy(&data.payload);
                let to = if pkt.to == BROADCAST_NUM {
                    "broadcast".to_string()
                } else {
                    node_id(pkt.to)
                };
                info!(
                    "Text from {} to {} ch{}: {}",
                    node_id(pkt.from),
                    to,
                    pkt.channel,
                    preview(&text, 120)
                );
            }
            other => trace!("Packet from {} on {:?}", node_id(pkt.from), other),
        }
    }

    /// Whether the handshake identified by `request_id` has finished.
    pub fn config_complete(&self, request_id: u32) -> bool {
        self.config_complete_id == Some(request_id) && self.my_node_num.is_some()
    }

    pub fn my_node_num(&self) -> Option<u32> {
        self.my_node_num
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.metadata.as_ref().map(|m| m.firmware_version.as_str())
    }

    pub fn node_table(&self) -> NodeTable {
        self.nodes
            .values()
            .map(|n| (table_key(n), to_json(&NodeView::from(n))))
            .collect()
    }

    /// The local node's entry, or `null` before `my_info` has arrived.
    pub fn my_node_info(&self) -> Value {
        self.my_node_num
            .and_then(|num| self.nodes.get(&num))
            .map(|n| to_json(&NodeView::from(n)))
            .unwrap_or(Value::Null)
    }

    pub fn channel_list(&self) -> Value {
        Value::Array(
            self.channels
                .values()
                .map(|c| to_json(&ChannelView::from(c)))
                .collect(),
        )
    }

    /// Resolve a destination to a node number.
    pub fn resolve(&self, dest: &Destination) -> Result<u32, DeviceError> {
        match dest {
            Destination::Broadcast => Ok(BROADCAST_NUM),
            Destination::Node(num) => Ok(*num),
            Destination::Local => self.my_node_num.ok_or(DeviceError::LocalNodeUnknown),
            Destination::UserId(id) => self
                .nodes
                .values()
                .find(|n| n.user.as_ref().is_some_and(|u| &u.id == id))
                .map(|n| n.num)
                .ok_or_else(|| DeviceError::UnknownNode(id.clone())),
        }
    }
}

fn to_json<T: serde::Serialize>(view: &T) -> Value {
    // Views contain only strings, integers, bools and finite-or-null floats
    serde_json::to_value(view).unwrap_or(Value::Null)
}
