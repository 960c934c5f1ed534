//! HTTP API handlers
//!
//! Every endpoint except `/` needs the radio. When it is missing, or when a
//! device call fails, the handler answers with `{"error": "..."}`. Those error
//! bodies are sent with `200 OK`, same as successes, so clients must look at
//! the body rather than the status code.

use crate::connection::{ConnectionManager, ConnectionState};
use crate::logutil::preview;
use crate::meshtastic::destination::BROADCAST_ADDR;
use crate::meshtastic::{DeviceError, MeshLink};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub connection: Arc<ConnectionManager>,
}

impl AppState {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection: Arc::new(connection),
        }
    }

    fn device(&self) -> Result<Arc<dyn MeshLink>, ApiError> {
        match self.connection.current() {
            ConnectionState::Connected(link) => Ok(link.clone()),
            ConnectionState::Disconnected => {
                Err(ApiError(self.connection.not_connected_message()))
            }
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status_handler))
        .route("/nodes", get(nodes_handler))
        .route("/send/text", post(send_text_handler))
        .route("/device/info", get(device_info_handler))
        .route("/channels", get(channels_handler))
        .with_state(state)
}

/// Error body, rendered with `200 OK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError(pub String);

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(ErrorResponse { error: self.0 })).into_response()
    }
}

impl From<DeviceError> for ApiError {
    fn from(e: DeviceError) -> Self {
        warn!("Device call failed: {}", e);
        ApiError(e.to_string())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Serialize)]
pub struct StatusResponse {
    pub message: &'static str,
}

/// GET / - liveness message, independent of the device
pub async fn status_handler() -> Json<StatusResponse> {
    Json(StatusResponse {
        message: "Meshtastic HTTP bridge is running (serial disabled if SERIAL_PORT not set)",
    })
}

/// One row of `GET /nodes`. Missing values serialize as `null`.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub id: String,
    pub long_name: Value,
    pub short_name: Value,
    pub last_heard: Value,
    pub battery_level: Value,
}

impl NodeSummary {
    pub fn from_entry(id: &str, node: &Value) -> Self {
        let field = |pointer: &str| node.pointer(pointer).cloned().unwrap_or(Value::Null);
        NodeSummary {
            id: id.to_string(),
            long_name: field("/user/longName"),
            short_name: field("/user/shortName"),
            last_heard: field("/lastHeard"),
            battery_level: field("/deviceMetrics/batteryLevel"),
        }
    }
}

#[derive(Serialize)]
pub struct NodesResponse {
    pub nodes: Vec<NodeSummary>,
}

/// GET /nodes - flattened node table
pub async fn nodes_handler(State(state): State<AppState>) -> ApiResult<NodesResponse> {
    let table = state.device()?.nodes()?;
    let nodes = table
        .iter()
        .map(|(id, node)| NodeSummary::from_entry(id, node))
        .collect();
    Ok(Json(NodesResponse { nodes }))
}

fn default_destination() -> String {
    BROADCAST_ADDR.to_string()
}

#[derive(Debug, Deserialize)]
pub struct SendTextRequest {
    #[serde(default = "default_destination")]
    pub destination: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SendTextResponse {
    pub status: &'static str,
    pub to: String,
    pub text: String,
}

/// POST /send/text - one text packet to a node or broadcast
pub async fn send_text_handler(
    State(state): State<AppState>,
    Json(req): Json<SendTextRequest>,
) -> ApiResult<SendTextResponse> {
    let device = state.device()?;
    debug!(
        "send/text to {}: '{}'",
        preview(&req.destination, 24),
        preview(&req.text, 80)
    );
    // Serial writes block; keep them off the async workers
    let SendTextRequest { destination, text } = req;
    let (destination, text) = tokio::task::spawn_blocking(move || {
        device
            .send_text(&text, &destination)
            .map(|()| (destination, text))
    })
    .await
    .map_err(|e| ApiError(format!("send task failed: {}", e)))??;

    Ok(Json(SendTextResponse {
        status: "sent",
        to: destination,
        text,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfoResponse {
    pub device_info: Value,
}

/// GET /device/info - the attached radio's own node entry
pub async fn device_info_handler(State(state): State<AppState>) -> ApiResult<DeviceInfoResponse> {
    let device_info = state.device()?.my_node_info()?;
    Ok(Json(DeviceInfoResponse { device_info }))
}

#[derive(Serialize)]
pub struct ChannelsResponse {
    pub channels: Value,
}

/// GET /channels - channel configuration
pub async fn channels_handler(State(state): State<AppState>) -> ApiResult<ChannelsResponse> {
    let channels = state.device()?.channels()?;
    Ok(Json(ChannelsResponse { channels }))
}
