use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Classification of a user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Requires multi-phase execution (plan, precheck, execute, verdict).
    Actionable,
    Planning,
    Qa,
    Smalltalk,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Actionable => "actionable",
            Intent::Planning => "planning",
            Intent::Qa => "qa",
            Intent::Smalltalk => "smalltalk",
        }
    }

    pub fn is_actionable(&self) -> bool {
        matches!(self, Intent::Actionable)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    /// Accepts the canonical names plus the legacy `task`/`chat` pair.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "actionable" | "task" => Ok(Intent::Actionable),
            "planning" | "plan" => Ok(Intent::Planning),
            "qa" | "question" => Ok(Intent::Qa),
            "smalltalk" | "chat" => Ok(Intent::Smalltalk),
            other => Err(format!("unknown intent: {other}")),
        }
    }
}

/// Label attached to every response fragment.
///
/// Declaration order is execution order; `Ord` is used to check that
/// fragments within one call never go backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    AtlasPlan,
    GrishaPrecheck,
    Execution,
    GrishaVerdict,
    GrishaFollowup,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::AtlasPlan => "atlas_plan",
            Phase::GrishaPrecheck => "grisha_precheck",
            Phase::Execution => "execution",
            Phase::GrishaVerdict => "grisha_verdict",
            Phase::GrishaFollowup => "grisha_followup",
        }
    }

    /// The agent that produces fragments of this phase.
    pub fn agent(&self) -> AgentRole {
        match self {
            Phase::AtlasPlan => AgentRole::Planner,
            Phase::Execution => AgentRole::Executor,
            Phase::GrishaPrecheck | Phase::GrishaVerdict | Phase::GrishaFollowup => {
                AgentRole::Verifier
            }
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The named agents of the crew.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Atlas: strategist, writes the plan.
    #[default]
    Planner,
    /// Grisha: validator, prechecks plans and judges results.
    Verifier,
    /// Tetyana: executor, carries the plan out.
    Executor,
}

impl AgentRole {
    /// The roster in turn order.
    pub const ALL: [AgentRole; 3] = [AgentRole::Planner, AgentRole::Executor, AgentRole::Verifier];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Verifier => "verifier",
            AgentRole::Executor => "executor",
        }
    }

    /// Signature prefixed to agent messages in transcripts.
    pub fn signature(&self) -> &'static str {
        match self {
            AgentRole::Planner => "[ATLAS]",
            AgentRole::Verifier => "[GRISHA]",
            AgentRole::Executor => "[TETYANA]",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AgentRole::Planner => "atlas",
            AgentRole::Verifier => "grisha",
            AgentRole::Executor => "tetyana",
        }
    }

    /// 1 speaks first.
    pub fn priority(&self) -> u8 {
        match self {
            AgentRole::Planner => 1,
            AgentRole::Executor => 2,
            AgentRole::Verifier => 3,
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of an actionable pipeline a single primary call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Plan + precheck now; execution + verdict on continuation.
    #[default]
    Staged,
    /// Everything in one call.
    Immediate,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Staged => "staged",
            ExecutionMode::Immediate => "immediate",
        }
    }

    /// Lenient parse: anything other than `immediate` means staged.
    pub fn parse_lenient(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("immediate") {
            ExecutionMode::Immediate
        } else {
            ExecutionMode::Staged
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_serialize_as_snake_case() {
        let json = serde_json::to_string(&Phase::GrishaPrecheck).unwrap();
        assert_eq!(json, "\"grisha_precheck\"");
        assert_eq!(Phase::GrishaFollowup.as_str(), "grisha_followup");
    }

    #[test]
    fn phase_order_follows_execution() {
        assert!(Phase::AtlasPlan < Phase::GrishaPrecheck);
        assert!(Phase::GrishaPrecheck < Phase::Execution);
        assert!(Phase::Execution < Phase::GrishaVerdict);
        assert!(Phase::GrishaVerdict < Phase::GrishaFollowup);
    }

    #[test]
    fn intent_parses_legacy_names() {
        assert_eq!("task".parse::<Intent>().unwrap(), Intent::Actionable);
        assert_eq!(" Chat ".parse::<Intent>().unwrap(), Intent::Smalltalk);
        assert!("dance".parse::<Intent>().is_err());
    }

    #[test]
    fn unknown_mode_is_staged() {
        assert_eq!(ExecutionMode::parse_lenient("IMMEDIATE"), ExecutionMode::Immediate);
        assert_eq!(ExecutionMode::parse_lenient("turbo"), ExecutionMode::Staged);
        assert_eq!(ExecutionMode::parse_lenient(""), ExecutionMode::Staged);
    }
}
