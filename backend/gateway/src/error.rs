//! Maps `AtlasError` onto HTTP status codes and a uniform JSON body.

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, warn};

use atlas_core::AtlasError;

#[derive(Debug)]
pub struct ApiError(pub AtlasError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AtlasError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            AtlasError::InvalidContinuation(_) | AtlasError::PipelineBusy(_) => {
                StatusCode::CONFLICT
            }
            AtlasError::ProviderUnavailable(_) | AtlasError::Classification(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AtlasError::Llm { .. } | AtlasError::AgentOutput { .. } => StatusCode::BAD_GATEWAY,
            AtlasError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AtlasError> for ApiError {
    fn from(err: AtlasError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(AtlasError::MalformedRequest(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(AtlasError::MalformedRequest(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if self.0.is_client_error() {
            warn!(code = self.0.code(), error = %self.0, "Request rejected");
        } else {
            error!(code = self.0.code(), error = %self.0, "Request failed");
        }
        let body = json!({
            "success": false,
            "error": self.0.to_string(),
            "code": self.0.code(),
        });
        (status, Json(body)).into_response()
    }
}
