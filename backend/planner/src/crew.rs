//! The three-agent crew: Atlas plans, Grisha checks, Tetyana executes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use atlas_core::{
    AgentRole, AtlasError, ChatTurn, ExecutionReport, Intent, LlmRequest, Plan, Precheck,
    TurnRole, Verification,
};

use crate::evidence::extract_evidence;
use crate::parse::extract_json;
use crate::router::ProviderRouter;

/// Turns of history handed to the agents as context.
const HISTORY_TURNS: usize = 3;
const HISTORY_TURN_CHARS: usize = 200;

/// Evidence score at which the fallback verdict calls a run complete.
const COMPLETE_SCORE: f64 = 0.5;

/// Agent operations the pipeline engine drives.
#[async_trait]
pub trait AgentCrew: Send + Sync {
    /// Direct answer for non-actionable intents.
    async fn reply(
        &self,
        message: &str,
        intent: Intent,
        history: &[ChatTurn],
    ) -> Result<String, AtlasError>;

    async fn plan(&self, message: &str, history: &[ChatTurn]) -> Result<Plan, AtlasError>;

    async fn precheck(&self, plan: &Plan) -> Result<Precheck, AtlasError>;

    /// Run the plan. `need` is set when supplementing an earlier run.
    async fn execute(&self, plan: &Plan, need: Option<&str>)
        -> Result<ExecutionReport, AtlasError>;

    async fn verify(
        &self,
        plan: &Plan,
        report: &ExecutionReport,
    ) -> Result<Verification, AtlasError>;
}

const ATLAS_PROMPT: &str = "You are ATLAS, the strategist of a three-agent team. \
Turn the user's request into a concrete task for the executor TETYANA. \
Reply with JSON only: {\"userReply\": \"short answer to the user\", \
\"task\": \"one-sentence task\", \"steps\": [\"...\"], \"successCriteria\": [\"...\"]}";

const ATLAS_CHAT_PROMPT: &str = "You are ATLAS, a concise and helpful assistant. \
Answer the user directly in their language.";

const GRISHA_PRECHECK_PROMPT: &str = "You are GRISHA, the safety reviewer. \
Decide whether the plan below is safe to execute on the user's machine. \
Destructive, irreversible or privacy-violating steps are unsafe. \
Reply with JSON only: {\"isSafe\": true|false, \"rationale\": \"...\"}";

const TETYANA_PROMPT: &str = "You are TETYANA, the executor. Carry out the task and \
report what you did. List touched files, the commands you ran (prefix each with `$ `) \
and their output in ``` fences. End with SUMMARY: <one line>.";

const GRISHA_VERDICT_PROMPT: &str = "You are GRISHA, the verifier. Judge whether the \
execution report satisfies the task and its success criteria. \
Reply with JSON only: {\"isComplete\": true|false, \"confidence\": 0.0-1.0, \
\"issues\": [\"what is still missing\"], \"note\": \"...\"}";

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct PlanReply {
    #[serde(alias = "user_reply", alias = "reply")]
    user_reply: String,
    task: String,
    steps: Vec<String>,
    #[serde(alias = "success_criteria")]
    success_criteria: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrecheckReply {
    #[serde(alias = "is_safe", alias = "safe")]
    is_safe: bool,
    #[serde(default)]
    rationale: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerdictReply {
    #[serde(alias = "is_complete", alias = "complete")]
    is_complete: bool,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    note: String,
}

/// `AgentCrew` backed by the provider router, one system prompt per role.
pub struct LlmCrew {
    router: Arc<ProviderRouter>,
}

impl LlmCrew {
    pub fn new(router: Arc<ProviderRouter>) -> Self {
        Self { router }
    }

    async fn ask(&self, system: &str, user: String) -> Result<String, AtlasError> {
        let response = self.router.complete(&LlmRequest::new(system, user)).await?;
        Ok(response.content)
    }
}

#[async_trait]
impl AgentCrew for LlmCrew {
    async fn reply(
        &self,
        message: &str,
        intent: Intent,
        history: &[ChatTurn],
    ) -> Result<String, AtlasError> {
        let prompt = format!(
            "{}Intent: {intent}\nUser: {message}",
            render_history(history)
        );
        let content = self.ask(ATLAS_CHAT_PROMPT, prompt).await?;
        let content = content.trim();
        if content.is_empty() {
            return Err(empty_output(AgentRole::Planner));
        }
        Ok(content.to_string())
    }

    async fn plan(&self, message: &str, history: &[ChatTurn]) -> Result<Plan, AtlasError> {
        let prompt = format!("{}User request: {message}", render_history(history));
        let content = self.ask(ATLAS_PROMPT, prompt).await?;

        let plan = match extract_json::<PlanReply>(&content) {
            Some(reply) => Plan {
                user_reply: reply.user_reply,
                task: if reply.task.trim().is_empty() {
                    message.to_string()
                } else {
                    reply.task
                },
                steps: reply.steps,
                success_criteria: reply.success_criteria,
            },
            None => {
                debug!("Planner reply was not JSON, using it verbatim");
                Plan {
                    user_reply: content.trim().to_string(),
                    task: message.to_string(),
                    ..Plan::default()
                }
            }
        };
        Ok(plan)
    }

    async fn precheck(&self, plan: &Plan) -> Result<Precheck, AtlasError> {
        let content = self.ask(GRISHA_PRECHECK_PROMPT, render_plan(plan)).await?;
        if let Some(reply) = extract_json::<PrecheckReply>(&content) {
            return Ok(Precheck {
                is_safe: reply.is_safe,
                rationale: reply.rationale,
            });
        }

        let lower = content.to_lowercase();
        let vetoed = ["unsafe", "not safe", "reject", "небезпечн"]
            .iter()
            .any(|w| lower.contains(w));
        Ok(Precheck {
            is_safe: !vetoed,
            rationale: content.trim().to_string(),
        })
    }

    async fn execute(
        &self,
        plan: &Plan,
        need: Option<&str>,
    ) -> Result<ExecutionReport, AtlasError> {
        let mut prompt = render_plan(plan);
        if let Some(need) = need {
            prompt.push_str(&format!("\nThe verifier asked for more: {need}"));
        }
        let text = self.ask(TETYANA_PROMPT, prompt).await?;
        if text.trim().is_empty() {
            return Err(empty_output(AgentRole::Executor));
        }
        let evidence = extract_evidence(&text);
        Ok(ExecutionReport {
            text,
            supplement_for: need.map(str::to_string),
            evidence,
        })
    }

    async fn verify(
        &self,
        plan: &Plan,
        report: &ExecutionReport,
    ) -> Result<Verification, AtlasError> {
        let prompt = format!("{}\nExecution report:\n{}", render_plan(plan), report.text);
        let content = self.ask(GRISHA_VERDICT_PROMPT, prompt).await?;
        let score = report.evidence.score;

        if let Some(reply) = extract_json::<VerdictReply>(&content) {
            return Ok(Verification {
                is_complete: reply.is_complete,
                confidence: reply.confidence.unwrap_or(score).clamp(0.0, 1.0),
                issues: reply.issues,
                note: reply.note,
            });
        }

        warn!("Verifier reply was not JSON, judging by evidence");
        let is_complete = score >= COMPLETE_SCORE;
        let issues = if is_complete {
            Vec::new()
        } else {
            vec!["no verifiable evidence of the result".to_string()]
        };
        Ok(Verification {
            is_complete,
            confidence: score,
            issues,
            note: content.trim().to_string(),
        })
    }
}

fn empty_output(agent: AgentRole) -> AtlasError {
    AtlasError::AgentOutput {
        agent: agent.as_str().to_string(),
        message: "empty reply".to_string(),
    }
}

fn render_plan(plan: &Plan) -> String {
    let mut out = format!("Task: {}\n", plan.task);
    if !plan.steps.is_empty() {
        out.push_str("Steps:\n");
        for (i, step) in plan.steps.iter().enumerate() {
            out.push_str(&format!("{}. {step}\n", i + 1));
        }
    }
    if !plan.success_criteria.is_empty() {
        out.push_str(&format!("Success criteria: {}\n", plan.success_criteria.join("; ")));
    }
    out
}

fn render_history(history: &[ChatTurn]) -> String {
    let start = history.len().saturating_sub(HISTORY_TURNS);
    let mut out = String::new();
    for turn in &history[start..] {
        let speaker = match (turn.role, turn.agent) {
            (TurnRole::User, _) => "User",
            (TurnRole::Assistant, Some(agent)) => agent.signature(),
            (TurnRole::Assistant, None) => "Assistant",
        };
        let content: String = turn.content.chars().take(HISTORY_TURN_CHARS).collect();
        out.push_str(&format!("{speaker}: {content}\n"));
    }
    if !out.is_empty() {
        out.insert_str(0, "Recent conversation:\n");
        out.push('\n');
    }
    out
}
