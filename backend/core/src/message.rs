use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentRole, Phase};

/// Who spoke a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One entry of a session transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub role: TurnRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            agent: None,
            phase: None,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn agent(phase: Phase, content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            agent: Some(phase.agent()),
            phase: Some(phase),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Planner output captured when an actionable pipeline starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Short answer shown to the user.
    pub user_reply: String,
    /// Task statement handed to the executor.
    pub task: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

/// Verifier judgement on a plan before anything runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Precheck {
    pub is_safe: bool,
    #[serde(default)]
    pub rationale: String,
}

/// Facts pulled out of an execution report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub files: Vec<String>,
    pub commands: Vec<String>,
    pub outputs: Vec<String>,
    pub summary: String,
    /// 0.0 (nothing found) to 1.0.
    pub score: f64,
}

/// What the executor reported after running (or supplementing) a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub text: String,
    /// Set when this run answered a `needs_more` request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplement_for: Option<String>,
    pub evidence: Evidence,
}

/// Verifier verdict on an execution report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub is_complete: bool,
    /// 0.0 to 1.0.
    pub confidence: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub note: String,
}

impl Verification {
    /// Human-readable statement of what is still missing.
    pub fn need(&self) -> String {
        if self.issues.is_empty() {
            "further work required".to_string()
        } else {
            self.issues.join("; ")
        }
    }
}
