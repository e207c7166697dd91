//! Gateway Agents API

use axum::Json;
use serde::Serialize;

use atlas_core::AgentRole;

#[derive(Debug, Serialize)]
pub struct AgentInfo {
    pub role: AgentRole,
    pub name: &'static str,
    pub signature: &'static str,
    pub priority: u8,
}

impl From<AgentRole> for AgentInfo {
    fn from(role: AgentRole) -> Self {
        Self {
            role,
            name: role.name(),
            signature: role.signature(),
            priority: role.priority(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AgentRoster {
    pub agents: Vec<AgentInfo>,
}

/// Handler for `GET /agents`
pub async fn list_agents() -> Json<AgentRoster> {
    Json(AgentRoster {
        agents: AgentRole::ALL.into_iter().map(AgentInfo::from).collect(),
    })
}
