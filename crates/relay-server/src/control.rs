//! HTTP control surface: status, server-originated broadcast and
//! data-change notification.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use relay_core::validate_room;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::ApiError;
use crate::hub::{DEFAULT_ROOM, HubStatus};
use crate::server::AppState;

/// `POST /broadcast` body.
#[derive(Clone, Debug, Deserialize)]
pub struct BroadcastRequest {
    /// Target room (default `"default"`).
    #[serde(default)]
    pub room: Option<String>,
    /// Payload delivered as the `data` of a `message` envelope.
    pub message: Value,
}

/// `POST /broadcast` response.
#[derive(Clone, Debug, Serialize)]
pub struct BroadcastResponse {
    /// Always `true`.
    pub success: bool,
    /// Sessions the message was queued for.
    pub delivered: usize,
}

/// `POST /notify` body.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    /// Table (model) name.
    pub table: String,
    /// Action name, e.g. `create`, `update`, `delete`, `batch_delete`.
    pub action: String,
    /// Affected record.
    #[serde(default)]
    pub record_id: Option<String>,
    /// Changed values.
    #[serde(default)]
    pub data: Option<Value>,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

/// GET /status
pub async fn status_handler(State(state): State<AppState>) -> Json<HubStatus> {
    Json(state.hub.status())
}

/// POST /broadcast
pub async fn broadcast_handler(
    State(state): State<AppState>,
    payload: Result<Json<BroadcastRequest>, JsonRejection>,
) -> Result<Json<BroadcastResponse>, ApiError> {
    let request = body(payload)?;
    let room = request.room.unwrap_or_else(|| DEFAULT_ROOM.to_owned());
    validate_room(&room).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let report = state.hub.publish(&room, request.message);
    info!(room = %room, delivered = report.delivered, "server broadcast");
    Ok(Json(BroadcastResponse {
        success: true,
        delivered: report.delivered,
    }))
}

/// POST /notify
pub async fn notify_handler(
    State(state): State<AppState>,
    payload: Result<Json<NotifyRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request = body(payload)?;
    if request.table.trim().is_empty() {
        return Err(ApiError::BadRequest("'table' must not be empty".into()));
    }
    if request.action.trim().is_empty() {
        return Err(ApiError::BadRequest("'action' must not be empty".into()));
    }

    let _ = state.hub.notify_data_change(
        &request.table,
        &request.action,
        request.record_id.as_deref(),
        request.data,
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "accepted": true })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_request_room_is_optional() {
        let req: BroadcastRequest = serde_json::from_str(r#"{"message":{"text":"hi"}}"#).unwrap();
        assert!(req.room.is_none());
        assert_eq!(req.message["text"], "hi");
    }

    #[test]
    fn broadcast_request_requires_message() {
        assert!(serde_json::from_str::<BroadcastRequest>(r#"{"room":"lobby"}"#).is_err());
    }

    #[test]
    fn notify_request_camel_case() {
        let req: NotifyRequest = serde_json::from_str(
            r#"{"table":"orders","action":"update","recordId":"42","data":{"status":"shipped"}}"#,
        )
        .unwrap();
        assert_eq!(req.record_id.as_deref(), Some("42"));
        assert_eq!(req.data.unwrap()["status"], "shipped");
    }

    #[test]
    fn notify_request_requires_table_and_action() {
        assert!(serde_json::from_str::<NotifyRequest>(r#"{"action":"update"}"#).is_err());
        assert!(serde_json::from_str::<NotifyRequest>(r#"{"table":"orders"}"#).is_err());
    }
}
