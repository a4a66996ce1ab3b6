use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::broker::CallError;

/// Structured error type for all API handlers.
///
/// Each variant maps to an HTTP status code, a machine-readable code string,
/// and a human-readable message. Implements [`IntoResponse`] so handlers can
/// return `Result<T, ApiError>` directly.
///
/// Only broker-local failures appear here. A tool that ran and failed on the
/// client is a successful response carrying an `error` field.
#[derive(Debug)]
pub enum ApiError {
    /// 400 - Malformed or invalid request.
    InvalidRequest(String),
    /// 409 - A call with this id is already pending.
    DuplicateCall(String),
    /// 502 - The call could not be handed to the session's connection.
    DeliveryFailed(String),
    /// 504 - No result arrived before the deadline.
    ToolCallTimeout(String),
    /// 503 - The call was withdrawn, e.g. because the server is shutting down.
    ToolCallCancelled(String),
}

impl ApiError {
    /// Returns the HTTP status code for this error variant.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::DuplicateCall(_) => StatusCode::CONFLICT,
            ApiError::DeliveryFailed(_) => StatusCode::BAD_GATEWAY,
            ApiError::ToolCallTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::ToolCallCancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns a machine-readable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::DuplicateCall(_) => "duplicate_call",
            ApiError::DeliveryFailed(_) => "delivery_failed",
            ApiError::ToolCallTimeout(_) => "tool_call_timeout",
            ApiError::ToolCallCancelled(_) => "tool_call_cancelled",
        }
    }

    /// Returns a human-readable error message.
    pub fn message(&self) -> String {
        match self {
            ApiError::InvalidRequest(detail) => format!("Invalid request: {}.", detail),
            ApiError::DuplicateCall(id) => format!("Tool call {} is already pending.", id),
            ApiError::DeliveryFailed(detail) => format!("Failed to deliver tool call: {}.", detail),
            ApiError::ToolCallTimeout(id) => {
                format!("Tool call {} did not complete within the deadline.", id)
            }
            ApiError::ToolCallCancelled(id) => format!("Tool call {} was cancelled.", id),
        }
    }
}

impl From<CallError> for ApiError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Duplicate(id) => ApiError::DuplicateCall(id),
            CallError::Delivery { source, .. } => ApiError::DeliveryFailed(source.to_string()),
            CallError::Timeout { call_id, .. } => ApiError::ToolCallTimeout(call_id),
            CallError::Cancelled(id) => ApiError::ToolCallCancelled(id),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ChannelError;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use std::time::Duration;

    /// Helper: convert an ApiError into a response and extract the status and
    /// parsed JSON body.
    async fn response_parts(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = Body::new(response.into_body())
            .collect()
            .await
            .unwrap()
            .to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        (status, json)
    }

    #[tokio::test]
    async fn timeout_maps_to_gateway_timeout() {
        let err: ApiError = CallError::Timeout {
            call_id: "c1".into(),
            timeout: Duration::from_millis(100),
        }
        .into();
        let (status, json) = response_parts(err).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json["error"]["code"], "tool_call_timeout");
        assert!(json["error"]["message"].as_str().unwrap().contains("c1"));
    }

    #[tokio::test]
    async fn delivery_maps_to_bad_gateway() {
        let err: ApiError = CallError::Delivery {
            call_id: "c1".into(),
            source: ChannelError::Closed("conn".into()),
        }
        .into();
        let (status, json) = response_parts(err).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["error"]["code"], "delivery_failed");
    }

    #[tokio::test]
    async fn duplicate_maps_to_conflict() {
        let (status, _) = response_parts(CallError::Duplicate("c1".into()).into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn cancelled_maps_to_unavailable() {
        let (status, _) = response_parts(CallError::Cancelled("c1".into()).into()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn invalid_request_has_structured_body() {
        let (status, json) = response_parts(ApiError::InvalidRequest("bad json".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "invalid_request");
        assert_eq!(json["error"]["message"], "Invalid request: bad json.");
    }
}
