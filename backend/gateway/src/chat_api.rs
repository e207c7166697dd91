//! `POST /chat` and `POST /chat/continue`.

use axum::{Json, extract::State, extract::rejection::JsonRejection};
use serde::Deserialize;

use atlas_orchestrator::ChatOutcome;

use crate::error::ApiError;
use crate::server::GatewayState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueRequest {
    #[serde(default)]
    pub session_id: String,
}

pub async fn chat(
    State(state): State<GatewayState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatOutcome>, ApiError> {
    let Json(req) = payload?;
    let outcome = state
        .orchestrator
        .chat(req.session_id.as_deref(), &req.message)
        .await?;
    Ok(Json(outcome))
}

pub async fn continue_chat(
    State(state): State<GatewayState>,
    payload: Result<Json<ContinueRequest>, JsonRejection>,
) -> Result<Json<ChatOutcome>, ApiError> {
    let Json(req) = payload?;
    let outcome = state.orchestrator.continue_session(&req.session_id).await?;
    Ok(Json(outcome))
}
