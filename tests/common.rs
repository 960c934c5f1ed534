//! Test utilities & fixtures.
//! Provides an in-memory `MeshLink` and helpers for driving the router without a radio.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use meshgate::api::{router, AppState};
use meshgate::connection::ConnectionManager;
use meshgate::meshtastic::{DeviceError, MeshLink, NodeTable};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Scriptable stand-in for a connected radio.
#[derive(Default)]
pub struct FakeMesh {
    pub table: NodeTable,
    pub my_info: Value,
    pub channel_list: Value,
    /// When set, the next `send_text` fails with this node id unknown.
    pub fail_next_send: AtomicBool,
    /// When set, every read (`nodes`, `my_node_info`, `channels`) fails.
    pub fail_reads: AtomicBool,
    pub sent: Mutex<Vec<(String, String)>>,
}

#[allow(dead_code)]
impl FakeMesh {
    pub fn with_nodes() -> Self {
        let mut table = NodeTable::new();
        table.insert(
            "!a1b2c3d4".into(),
            json!({
                "num": 0xa1b2c3d4u32,
                "user": { "id": "!a1b2c3d4", "longName": "Ridge Repeater", "shortName": "RDG" },
                "lastHeard": 1_700_000_500,
                "deviceMetrics": { "batteryLevel": 87, "voltage": 4.01 }
            }),
        );
        table.insert("!0000beef".into(), json!({ "num": 0xbeef }));
        FakeMesh {
            table,
            my_info: json!({
                "num": 0xa1b2c3d4u32,
                "user": { "id": "!a1b2c3d4", "longName": "Ridge Repeater", "shortName": "RDG" }
            }),
            channel_list: json!([{ "index": 0, "role": "PRIMARY", "settings": { "name": "LongFast" } }]),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

impl MeshLink for FakeMesh {
    fn nodes(&self) -> Result<NodeTable, DeviceError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DeviceError::Poisoned);
        }
        Ok(self.table.clone())
    }

    fn send_text(&self, text: &str, destination: &str) -> Result<(), DeviceError> {
        if self.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(DeviceError::UnknownNode(destination.to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }

    fn my_node_info(&self) -> Result<Value, DeviceError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DeviceError::LocalNodeUnknown);
        }
        Ok(self.my_info.clone())
    }

    fn channels(&self) -> Result<Value, DeviceError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DeviceError::Poisoned);
        }
        Ok(self.channel_list.clone())
    }
}

#[allow(dead_code)]
pub fn connected_app(mesh: Arc<FakeMesh>) -> axum::Router {
    router(AppState::new(ConnectionManager::connected(
        "/dev/ttyUSB0",
        mesh,
    )))
}

#[allow(dead_code)]
pub fn disconnected_app(port: &str) -> axum::Router {
    router(AppState::new(ConnectionManager::disconnected(port)))
}

/// Issue one request and return status plus parsed JSON body.
#[allow(dead_code)]
pub async fn call(app: axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[allow(dead_code)]
pub async fn call_raw(app: axum::Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

#[allow(dead_code)]
pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[allow(dead_code)]
pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
