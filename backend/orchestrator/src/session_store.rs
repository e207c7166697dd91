//! Per-session conversation and pipeline state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use atlas_core::{AgentRole, ChatTurn, ExecutionReport, Intent, Plan, Precheck};

pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(3_600);

/// Where an in-flight actionable pipeline is parked between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Plan approved; waiting for the first execution.
    Prechecked,
    /// Verifier asked for a supplement.
    NeedsMore,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Prechecked => "prechecked",
            PipelineStage::NeedsMore => "needs_more",
        }
    }

    /// The continuation step this stage is waiting for.
    pub fn next_action(&self) -> NextAction {
        match self {
            PipelineStage::Prechecked => NextAction::TetyanaExecute,
            PipelineStage::NeedsMore => NextAction::TetyanaSupplement,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    TetyanaExecute,
    TetyanaSupplement,
}

impl NextAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            NextAction::TetyanaExecute => "tetyana_execute",
            NextAction::TetyanaSupplement => "tetyana_supplement",
        }
    }
}

/// In-flight multi-phase work. Exists only between pipeline start and
/// the terminal verdict.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRecord {
    /// Always `actionable`.
    #[serde(rename = "type")]
    pub kind: Intent,
    pub stage: PipelineStage,
    pub user_message: String,
    pub atlas_plan: Plan,
    pub grisha_pre: Precheck,
    pub iter: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub need: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<ExecutionReport>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub history: Vec<ChatTurn>,
    pub current_agent: AgentRole,
    pub last_interaction: DateTime<Utc>,
    pub pipeline: Option<PipelineRecord>,
    pub intent: Option<Intent>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            history: Vec::new(),
            current_agent: AgentRole::default(),
            last_interaction: Utc::now(),
            pipeline: None,
            intent: None,
        }
    }

    /// Derived from the pipeline stage, so it is `None` exactly when idle.
    pub fn next_action(&self) -> Option<NextAction> {
        self.pipeline.as_ref().map(|p| p.stage.next_action())
    }

    pub fn is_idle(&self) -> bool {
        self.pipeline.is_none()
    }

    pub fn stage(&self) -> Option<PipelineStage> {
        self.pipeline.as_ref().map(|p| p.stage)
    }

    pub fn push_turn(&mut self, turn: ChatTurn) {
        if let Some(agent) = turn.agent {
            self.current_agent = agent;
        }
        self.history.push(turn);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_interaction = Utc::now();
    }
}

pub type SessionHandle = Arc<Mutex<Session>>;

/// Process-wide session map. Each session has its own async mutex;
/// sessions idle past the TTL are dropped along with any pending work.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Cache<String, SessionHandle>,
}

impl SessionStore {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: Cache::builder().time_to_idle(idle_ttl).build(),
        }
    }

    /// Existing session or a fresh one; idempotent per id.
    pub fn init_session(&self, id: &str) -> SessionHandle {
        self.sessions
            .get_with(id.to_string(), || Arc::new(Mutex::new(Session::new(id))))
    }

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.get(id)
    }

    pub fn remove(&self, id: &str) {
        self.sessions.invalidate(id);
    }

    pub fn len(&self) -> u64 {
        self.sessions.run_pending_tasks();
        self.sessions.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TTL)
    }
}
