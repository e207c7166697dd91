//! Gateway Health API
//!
//! Process health, intent cache counters and the circuit breaker state of
//! every provider.

use std::collections::BTreeMap;

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

use atlas_core::ExecutionMode;
use atlas_orchestrator::CacheStats;
use atlas_planner::BreakerSnapshot;

use crate::server::GatewayState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: String,
    pub uptime_seconds: u64,
    pub sessions: u64,
    pub execution_mode: ExecutionMode,
    pub intent_cache: CacheStats,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct ProvidersState {
    pub providers: BTreeMap<String, BreakerSnapshot>,
}

/// Handler for `GET /health`
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok".into(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        sessions: state.orchestrator.session_count(),
        execution_mode: state.orchestrator.execution_mode(),
        intent_cache: state.orchestrator.intent_cache_stats().await,
        timestamp: Utc::now(),
    })
}

/// Handler for `GET /providers/state`
pub async fn providers_state(State(state): State<GatewayState>) -> Json<ProvidersState> {
    Json(ProvidersState {
        providers: state.orchestrator.providers_state().await,
    })
}
