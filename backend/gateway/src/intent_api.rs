//! `GET /intent?text=` and `POST /intent {text}`.

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

use atlas_core::{AtlasError, Intent};

use crate::error::ApiError;
use crate::server::GatewayState;

#[derive(Debug, Deserialize)]
pub struct IntentQuery {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct IntentResponse {
    pub intent: Intent,
    pub cached: bool,
}

pub async fn get_intent(
    State(state): State<GatewayState>,
    query: Result<Query<IntentQuery>, QueryRejection>,
) -> Result<Json<IntentResponse>, ApiError> {
    let Query(query) = query?;
    lookup(&state, &query.text).await
}

pub async fn post_intent(
    State(state): State<GatewayState>,
    payload: Result<Json<IntentQuery>, JsonRejection>,
) -> Result<Json<IntentResponse>, ApiError> {
    let Json(query) = payload?;
    lookup(&state, &query.text).await
}

async fn lookup(state: &GatewayState, text: &str) -> Result<Json<IntentResponse>, ApiError> {
    if text.trim().is_empty() {
        return Err(AtlasError::MalformedRequest("text must not be empty".to_string()).into());
    }
    let (classification, cached) = state.orchestrator.classify(text).await;
    Ok(Json(IntentResponse {
        intent: classification.intent,
        cached,
    }))
}
