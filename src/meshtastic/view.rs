//! JSON views of the node database.
//!
//! Field names are camelCase and default/absent values are omitted, so a node
//! the radio only knows by number serializes as `{"num": 1234}`.

use super::destination::node_id;
use crate::protobuf::meshtastic_generated as proto;
use serde::Serialize;

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn enum_name(name: Option<&'static str>, raw: i32) -> String {
    name.map(str::to_string).unwrap_or_else(|| raw.to_string())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub num: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<PositionView>,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub snr: f32,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub last_heard: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_metrics: Option<DeviceMetricsView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hops_away: Option<u32>,
    #[serde(skip_serializing_if = "is_false")]
    pub via_mqtt: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub is_favorite: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub long_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub short_name: String,
    /// `None` for UNSET.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hw_model: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub is_licensed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<i32>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub time: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetricsView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_utilization: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_util_tx: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelView {
    pub index: i32,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<ChannelSettingsView>,
}

/// Channel settings minus the PSK, which never leaves the bridge.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSettingsView {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub id: u32,
    #[serde(skip_serializing_if = "is_false")]
    pub uplink_enabled: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub downlink_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_settings: Option<ModuleSettingsView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSettingsView {
    pub position_precision: u32,
}

impl From<&proto::NodeInfo> for NodeView {
    fn from(n: &proto::NodeInfo) -> Self {
        NodeView {
            num: n.num,
            user: n.user.as_ref().map(UserView::from),
            position: n.position.as_ref().map(PositionView::from),
            snr: n.snr,
            last_heard: n.last_heard,
            device_metrics: n.device_metrics.as_ref().map(DeviceMetricsView::from),
            hops_away: n.hops_away,
            via_mqtt: n.via_mqtt,
            is_favorite: n.is_favorite,
        }
    }
}

impl From<&proto::User> for UserView {
    fn from(u: &proto::User) -> Self {
        let hw = proto::HardwareModel::try_from(u.hw_model)
            .ok()
            .map(|m| m.as_str_name());
        UserView {
            id: u.id.clone(),
            long_name: u.long_name.clone(),
            short_name: u.short_name.clone(),
            hw_model: (u.hw_model != 0).then(|| enum_name(hw, u.hw_model)),
            is_licensed: u.is_licensed,
        }
    }
}

impl From<&proto::Position> for PositionView {
    fn from(p: &proto::Position) -> Self {
        PositionView {
            latitude: p.latitude_i.map(|v| v as f64 * 1e-7),
            longitude: p.longitude_i.map(|v| v as f64 * 1e-7),
            altitude: p.altitude,
            time: if p.time != 0 { p.time } else { p.timestamp },
        }
    }
}

impl From<&proto::DeviceMetrics> for DeviceMetricsView {
    fn from(m: &proto::DeviceMetrics) -> Self {
        DeviceMetricsView {
            battery_level: m.battery_level,
            voltage: m.voltage,
            channel_utilization: m.channel_utilization,
            air_util_tx: m.air_util_tx,
            uptime_seconds: m.uptime_seconds,
        }
    }
}

impl From<&proto::Channel> for ChannelView {
    fn from(c: &proto::Channel) -> Self {
        let role = proto::channel::Role::try_from(c.role)
            .ok()
            .map(|r| r.as_str_name());
        ChannelView {
            index: c.index,
            role: enum_name(role, c.role),
            settings: c.settings.as_ref().map(|s| ChannelSettingsView {
                name: s.name.clone(),
                id: s.id,
                uplink_enabled: s.uplink_enabled,
                downlink_enabled: s.downlink_enabled,
                module_settings: s.module_settings.as_ref().map(|m| ModuleSettingsView {
                    position_precision: m.position_precision,
                }),
            }),
        }
    }
}

/// Id a node is listed under: its announced user id, else the canonical
/// `!xxxxxxxx` form of its number.
pub fn table_key(n: &proto::NodeInfo) -> String {
    match n.user.as_ref() {
        Some(u) if !u.id.is_empty() => u.id.clone(),
        _ => node_id(n.num),
    }
}
