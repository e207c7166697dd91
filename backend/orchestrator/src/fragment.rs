//! Response fragments. Every fragment is tagged with the phase that
//! produced it; the tag is the enum variant itself.

use serde::{Deserialize, Serialize};

use atlas_core::{AgentRole, AtlasError, Evidence, Intent, Phase};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanFragment {
    pub agent: AgentRole,
    pub content: String,
    pub intent: Intent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecheckFragment {
    pub agent: AgentRole,
    pub content: String,
    pub is_safe: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFragment {
    pub agent: AgentRole,
    pub content: String,
    pub evidence: Evidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplement_for: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictFragment {
    pub agent: AgentRole,
    pub content: String,
    pub is_complete: bool,
    pub confidence: f64,
    #[serde(default)]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowupFragment {
    pub agent: AgentRole,
    pub content: String,
    pub need: String,
    pub iter: u32,
    pub gave_up: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Fragment {
    AtlasPlan(PlanFragment),
    GrishaPrecheck(PrecheckFragment),
    Execution(ExecutionFragment),
    GrishaVerdict(VerdictFragment),
    GrishaFollowup(FollowupFragment),
}

impl Fragment {
    pub fn phase(&self) -> Phase {
        match self {
            Fragment::AtlasPlan(_) => Phase::AtlasPlan,
            Fragment::GrishaPrecheck(_) => Phase::GrishaPrecheck,
            Fragment::Execution(_) => Phase::Execution,
            Fragment::GrishaVerdict(_) => Phase::GrishaVerdict,
            Fragment::GrishaFollowup(_) => Phase::GrishaFollowup,
        }
    }

    pub fn agent(&self) -> AgentRole {
        self.phase().agent()
    }

    pub fn content(&self) -> &str {
        match self {
            Fragment::AtlasPlan(f) => &f.content,
            Fragment::GrishaPrecheck(f) => &f.content,
            Fragment::Execution(f) => &f.content,
            Fragment::GrishaVerdict(f) => &f.content,
            Fragment::GrishaFollowup(f) => &f.content,
        }
    }
}

/// Fragments of one call, kept in non-decreasing phase order.
#[derive(Debug, Default)]
pub struct FragmentLog {
    fragments: Vec<Fragment>,
}

impl FragmentLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: Fragment) -> Result<(), AtlasError> {
        if let Some(last) = self.fragments.last() {
            if fragment.phase() < last.phase() {
                return Err(AtlasError::Other(anyhow::anyhow!(
                    "fragment {} emitted after {}",
                    fragment.phase(),
                    last.phase()
                )));
            }
        }
        self.fragments.push(fragment);
        Ok(())
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.fragments.iter().map(Fragment::phase).collect()
    }

    pub fn into_vec(self) -> Vec<Fragment> {
        self.fragments
    }
}
