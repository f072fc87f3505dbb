use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use facemark_store::StoreError;
use serde_json::json;

/// Error returned from HTTP handlers, rendered as `{"message": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Store(StoreError),
    Multipart(MultipartError),
    BadRequest(String),
    SessionDisabled,
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::Multipart(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Store(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Multipart(e) => e.status(),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::SessionDisabled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Store(e) => e.to_string(),
            Self::Multipart(e) => e.body_text(),
            Self::BadRequest(msg) | Self::Internal(msg) => msg.clone(),
            Self::SessionDisabled => {
                "recognition session is not configured (set FACEMARK_PROVIDER_CMD)".to_string()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!(%status, %message, "request failed");
        } else {
            tracing::info!(%status, %message, "request rejected");
        }
        (status, Json(json!({ "message": message }))).into_response()
    }
}
