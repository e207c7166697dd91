//! The orchestrator: classify, then run as much of the pipeline as the
//! execution mode allows, recording every fragment on the session.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use atlas_core::{AgentRole, AtlasError, ChatTurn, ExecutionMode, Intent};
use atlas_logging::{EventLogger, PipelineEvent};
use atlas_planner::{
    AgentCrew, BreakerSnapshot, Classification, IntentClassifier, ProviderRouter,
};

use crate::fragment::{
    ExecutionFragment, Fragment, FragmentLog, FollowupFragment, PlanFragment, PrecheckFragment,
    VerdictFragment,
};
use crate::intent_cache::{self, CacheStats, IntentCache};
use crate::pipeline::should_immediate_execute;
use crate::session_store::{self, NextAction, PipelineStage, Session, SessionStore};

pub const EXECUTION_MODE_ENV: &str = "EXECUTION_MODE";
pub const DEFAULT_MAX_REFINEMENT_CYCLES: u32 = 3;

/// Where the execution mode comes from. Read on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSource {
    /// `EXECUTION_MODE` environment variable; unset or unknown is staged.
    Env,
    Fixed(ExecutionMode),
}

impl ModeSource {
    pub fn current(&self) -> ExecutionMode {
        match self {
            ModeSource::Env => std::env::var(EXECUTION_MODE_ENV)
                .map(|raw| ExecutionMode::parse_lenient(&raw))
                .unwrap_or_default(),
            ModeSource::Fixed(mode) => *mode,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: ModeSource,
    /// Supplement requests allowed before the verifier gives up.
    pub max_refinement_cycles: u32,
    pub intent_cache_capacity: usize,
    pub intent_cache_ttl: Duration,
    pub session_idle_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ModeSource::Env,
            max_refinement_cycles: DEFAULT_MAX_REFINEMENT_CYCLES,
            intent_cache_capacity: intent_cache::DEFAULT_CAPACITY,
            intent_cache_ttl: intent_cache::DEFAULT_TTL,
            session_idle_ttl: session_store::DEFAULT_IDLE_TTL,
        }
    }
}

/// Result of one primary or continuation call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOutcome {
    pub success: bool,
    pub session_id: String,
    pub response: Vec<Fragment>,
    pub next_action: Option<NextAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatOutcome {
    pub fn phases(&self) -> Vec<atlas_core::Phase> {
        self.response.iter().map(Fragment::phase).collect()
    }
}

pub struct Orchestrator {
    sessions: SessionStore,
    intent_cache: Mutex<IntentCache>,
    classifier: Arc<dyn IntentClassifier>,
    crew: Arc<dyn AgentCrew>,
    router: Option<Arc<ProviderRouter>>,
    events: EventLogger,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        crew: Arc<dyn AgentCrew>,
        config: EngineConfig,
    ) -> Self {
        Self {
            sessions: SessionStore::new(config.session_idle_ttl),
            intent_cache: Mutex::new(IntentCache::new(
                config.intent_cache_capacity,
                config.intent_cache_ttl,
            )),
            classifier,
            crew,
            router: None,
            events: EventLogger,
            config,
        }
    }

    /// Router whose breakers are reported by `providers_state`.
    pub fn with_router(mut self, router: Arc<ProviderRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.config.mode.current()
    }

    pub fn session_count(&self) -> u64 {
        self.sessions.len()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn intent_cache_stats(&self) -> CacheStats {
        self.intent_cache.lock().await.stats()
    }

    pub async fn providers_state(&self) -> BTreeMap<String, BreakerSnapshot> {
        match &self.router {
            Some(router) => router.snapshot().await,
            None => BTreeMap::new(),
        }
    }

    /// Cache-checked classification; the flag says whether it was a hit.
    ///
    /// Never fails: a classifier error yields `qa`, which is not cached.
    pub async fn classify(&self, text: &str) -> (Classification, bool) {
        if let Some(hit) = self.intent_cache.lock().await.get(text) {
            return (hit, true);
        }
        match self.classifier.classify(text).await {
            Ok(classification) => {
                self.intent_cache
                    .lock()
                    .await
                    .set(text, classification.clone());
                (classification, false)
            }
            Err(e) => {
                warn!(error = %e, "Classification failed, defaulting to qa");
                (Classification::new(Intent::Qa), false)
            }
        }
    }

    /// Primary entry point: a new user message.
    pub async fn chat(
        &self,
        session_id: Option<&str>,
        message: &str,
    ) -> Result<ChatOutcome, AtlasError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AtlasError::MalformedRequest(
                "message must not be empty".to_string(),
            ));
        }
        let session_id = match session_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };

        let (classification, cached) = self.classify(message).await;
        let intent = classification.intent;
        info!(session_id = %session_id, intent = %intent, cached, "Message classified");

        let handle = self.sessions.init_session(&session_id);
        let mut session = handle.lock().await;
        session.push_turn(ChatTurn::user(message));
        session.intent = Some(intent);

        let mut log = FragmentLog::new();

        if !intent.is_actionable() {
            let reply = match classification.reply {
                Some(reply) => reply,
                None => self.crew.reply(message, intent, &session.history).await?,
            };
            self.emit(
                &mut session,
                &mut log,
                Fragment::AtlasPlan(PlanFragment {
                    agent: AgentRole::Planner,
                    content: reply,
                    intent,
                    steps: Vec::new(),
                }),
            )?;
            return Ok(self.outcome(&session, log, None));
        }

        let plan = self.crew.plan(message, &session.history).await?;
        let content = if plan.user_reply.trim().is_empty() {
            plan.task.clone()
        } else {
            plan.user_reply.clone()
        };
        self.emit(
            &mut session,
            &mut log,
            Fragment::AtlasPlan(PlanFragment {
                agent: AgentRole::Planner,
                content,
                intent,
                steps: plan.steps.clone(),
            }),
        )?;

        let precheck = self.crew.precheck(&plan).await?;
        self.emit(
            &mut session,
            &mut log,
            Fragment::GrishaPrecheck(PrecheckFragment {
                agent: AgentRole::Verifier,
                content: precheck.rationale.clone(),
                is_safe: precheck.is_safe,
            }),
        )?;
        if !precheck.is_safe {
            warn!(session_id = %session.id, "Plan vetoed by precheck");
            return Ok(self.outcome(&session, log, None));
        }

        // A failed or vetoed replacement leaves pending work resumable.
        if let Some(stale) = &session.pipeline {
            info!(
                session_id = %session.id,
                stage = stale.stage.as_str(),
                "New task supersedes pending pipeline"
            );
            let reason = format!("superseded by new task (was {})", stale.stage.as_str());
            self.events
                .log_event(&session.id, PipelineEvent::PipelineAbandoned { reason });
            session.clear_pipeline();
        }
        session.start_actionable_pipeline(message, plan, precheck)?;
        self.stage_changed(&session, None);

        let mode = self.execution_mode();
        if should_immediate_execute(mode, intent) {
            if let Err(e) = self.advance(&mut session, &mut log).await {
                return Ok(self.failed(&session, log, e));
            }
        }
        Ok(self.outcome(&session, log, None))
    }

    /// Continuation entry point: run whatever `nextAction` names.
    pub async fn continue_session(&self, session_id: &str) -> Result<ChatOutcome, AtlasError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(AtlasError::MalformedRequest(
                "sessionId must not be empty".to_string(),
            ));
        }
        let handle = self
            .sessions
            .get(session_id)
            .ok_or_else(|| AtlasError::InvalidContinuation(session_id.to_string()))?;
        let mut session = handle.lock().await;
        if session.next_action().is_none() {
            return Err(AtlasError::InvalidContinuation(session_id.to_string()));
        }
        session.touch();

        let mut log = FragmentLog::new();
        match self.advance(&mut session, &mut log).await {
            Ok(()) => Ok(self.outcome(&session, log, None)),
            Err(e) => Ok(self.failed(&session, log, e)),
        }
    }

    /// Execute (or supplement) and judge. The pipeline record is only
    /// touched once both agent calls have succeeded.
    async fn advance(&self, session: &mut Session, log: &mut FragmentLog) -> Result<(), AtlasError> {
        let Some(pipeline) = session.pipeline.as_ref() else {
            return Err(AtlasError::InvalidContinuation(session.id.clone()));
        };
        let plan = pipeline.atlas_plan.clone();
        let from = pipeline.stage;
        let iter = pipeline.iter;
        let need = match from {
            PipelineStage::NeedsMore => pipeline.need.clone(),
            PipelineStage::Prechecked => None,
        };

        let report = self.crew.execute(&plan, need.as_deref()).await?;
        self.emit(
            session,
            log,
            Fragment::Execution(ExecutionFragment {
                agent: AgentRole::Executor,
                content: report.text.clone(),
                evidence: report.evidence.clone(),
                supplement_for: report.supplement_for.clone(),
            }),
        )?;

        let verification = self.crew.verify(&plan, &report).await?;
        self.emit(
            session,
            log,
            Fragment::GrishaVerdict(VerdictFragment {
                agent: AgentRole::Verifier,
                content: verification.note.clone(),
                is_complete: verification.is_complete,
                confidence: verification.confidence,
                issues: verification.issues.clone(),
            }),
        )?;

        if verification.is_complete {
            info!(
                session_id = %session.id,
                confidence = verification.confidence,
                "Task verified complete"
            );
            session.clear_pipeline();
            self.stage_changed(session, Some(from));
            return Ok(());
        }

        let need = verification.need();
        if iter >= self.config.max_refinement_cycles {
            warn!(session_id = %session.id, iter, "Supplement limit reached, giving up");
            self.emit(
                session,
                log,
                Fragment::GrishaFollowup(FollowupFragment {
                    agent: AgentRole::Verifier,
                    content: format!("Giving up after {iter} supplement cycles: {need}"),
                    need,
                    iter,
                    gave_up: true,
                }),
            )?;
            session.clear_pipeline();
            self.stage_changed(session, Some(from));
            return Ok(());
        }

        session.mark_needs_more(need.clone(), report);
        self.stage_changed(session, Some(from));
        self.emit(
            session,
            log,
            Fragment::GrishaFollowup(FollowupFragment {
                agent: AgentRole::Verifier,
                content: format!("More work needed: {need}"),
                need,
                iter: iter + 1,
                gave_up: false,
            }),
        )?;
        Ok(())
    }

    fn emit(
        &self,
        session: &mut Session,
        log: &mut FragmentLog,
        fragment: Fragment,
    ) -> Result<(), AtlasError> {
        let phase = fragment.phase();
        let event = PipelineEvent::PhaseEmitted {
            phase: phase.as_str().to_string(),
            agent: fragment.agent().as_str().to_string(),
            content: fragment.content().to_string(),
        };
        let turn = ChatTurn::agent(phase, fragment.content());
        log.push(fragment)?;
        self.events.log_event(&session.id, event);
        session.push_turn(turn);
        Ok(())
    }

    fn stage_changed(&self, session: &Session, from: Option<PipelineStage>) {
        self.events.log_event(
            &session.id,
            PipelineEvent::StageChanged {
                from: from.map(|s| s.as_str().to_string()),
                to: session.stage().map(|s| s.as_str().to_string()),
                iter: session.pipeline.as_ref().map(|p| p.iter).unwrap_or(0),
            },
        );
    }

    fn outcome(&self, session: &Session, log: FragmentLog, error: Option<String>) -> ChatOutcome {
        ChatOutcome {
            success: error.is_none(),
            session_id: session.id.clone(),
            response: log.into_vec(),
            next_action: session.next_action(),
            error,
        }
    }

    fn failed(&self, session: &Session, log: FragmentLog, error: AtlasError) -> ChatOutcome {
        warn!(session_id = %session.id, error = %error, "Pipeline step failed");
        self.events.log_event(
            &session.id,
            PipelineEvent::Error {
                message: error.to_string(),
            },
        );
        self.outcome(session, log, Some(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use atlas_core::{Evidence, ExecutionReport, Phase, Plan, Precheck, Verification};
    use atlas_planner::HeuristicClassifier;
    use serial_test::serial;

    const TASK: &str = "Create file example.txt with text HELLO";

    /// Scripted crew: verdicts are popped in order, defaulting to complete.
    #[derive(Default)]
    struct StubCrew {
        unsafe_plan: bool,
        fail_execute: bool,
        /// Planning this exact message fails as if every provider were down.
        fail_plan_on: Option<&'static str>,
        /// Prechecking a plan for this exact task vetoes it.
        veto_on: Option<&'static str>,
        verdicts: StdMutex<VecDeque<bool>>,
        replies: AtomicUsize,
        executions: AtomicUsize,
    }

    impl StubCrew {
        fn with_verdicts(verdicts: &[bool]) -> Self {
            Self {
                verdicts: StdMutex::new(verdicts.iter().copied().collect()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl AgentCrew for StubCrew {
        async fn reply(
            &self,
            message: &str,
            _intent: Intent,
            _history: &[ChatTurn],
        ) -> Result<String, AtlasError> {
            self.replies.fetch_add(1, Ordering::SeqCst);
            Ok(format!("answer to {message}"))
        }

        async fn plan(&self, message: &str, _history: &[ChatTurn]) -> Result<Plan, AtlasError> {
            if self.fail_plan_on == Some(message) {
                return Err(AtlasError::ProviderUnavailable("circuit open".into()));
            }
            Ok(Plan {
                user_reply: "I'll handle it".into(),
                task: message.into(),
                steps: vec!["write the file".into()],
                success_criteria: vec![],
            })
        }

        async fn precheck(&self, plan: &Plan) -> Result<Precheck, AtlasError> {
            let vetoed = self.unsafe_plan || self.veto_on == Some(plan.task.as_str());
            Ok(Precheck {
                is_safe: !vetoed,
                rationale: if vetoed { "destructive" } else { "fine" }.into(),
            })
        }

        async fn execute(
            &self,
            plan: &Plan,
            need: Option<&str>,
        ) -> Result<ExecutionReport, AtlasError> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            if self.fail_execute {
                return Err(AtlasError::Llm {
                    provider: "stub".into(),
                    message: "executor offline".into(),
                });
            }
            Ok(ExecutionReport {
                text: format!("did: {}", plan.task),
                supplement_for: need.map(str::to_string),
                evidence: Evidence {
                    files: vec!["example.txt".into()],
                    score: 0.3,
                    ..Evidence::default()
                },
            })
        }

        async fn verify(
            &self,
            _plan: &Plan,
            _report: &ExecutionReport,
        ) -> Result<Verification, AtlasError> {
            let complete = self
                .verdicts
                .lock()
                .ok()
                .and_then(|mut v| v.pop_front())
                .unwrap_or(true);
            Ok(Verification {
                is_complete: complete,
                confidence: if complete { 0.9 } else { 0.4 },
                issues: if complete { vec![] } else { vec!["show the file contents".into()] },
                note: "checked".into(),
            })
        }
    }

    struct BrokenClassifier;

    #[async_trait]
    impl IntentClassifier for BrokenClassifier {
        async fn classify(&self, _text: &str) -> Result<Classification, AtlasError> {
            Err(AtlasError::Classification("backend down".into()))
        }
    }

    fn engine(crew: StubCrew, mode: ExecutionMode) -> (Orchestrator, Arc<StubCrew>) {
        let crew = Arc::new(crew);
        let config = EngineConfig {
            mode: ModeSource::Fixed(mode),
            ..EngineConfig::default()
        };
        let orch = Orchestrator::new(Arc::new(HeuristicClassifier), crew.clone(), config);
        (orch, crew)
    }

    #[tokio::test]
    async fn staged_mode_splits_work_across_calls() {
        let (orch, _) = engine(StubCrew::default(), ExecutionMode::Staged);

        let first = orch.chat(Some("s1"), TASK).await.unwrap();
        assert!(first.success);
        assert_eq!(first.phases(), vec![Phase::AtlasPlan, Phase::GrishaPrecheck]);
        assert_eq!(first.next_action, Some(NextAction::TetyanaExecute));

        let second = orch.continue_session("s1").await.unwrap();
        assert_eq!(second.phases(), vec![Phase::Execution, Phase::GrishaVerdict]);
        assert_eq!(second.next_action, None);

        let err = orch.continue_session("s1").await.unwrap_err();
        assert!(matches!(err, AtlasError::InvalidContinuation(_)));
    }

    #[tokio::test]
    async fn immediate_mode_runs_everything_at_once() {
        let (orch, _) = engine(StubCrew::default(), ExecutionMode::Immediate);
        let out = orch.chat(Some("s2"), TASK).await.unwrap();
        assert_eq!(
            out.phases(),
            vec![
                Phase::AtlasPlan,
                Phase::GrishaPrecheck,
                Phase::Execution,
                Phase::GrishaVerdict
            ]
        );
        assert_eq!(out.next_action, None);
        let Fragment::GrishaVerdict(verdict) = &out.response[3] else {
            panic!("expected verdict");
        };
        assert_eq!(verdict.confidence, 0.9);
    }

    #[tokio::test]
    async fn non_actionable_answers_directly() {
        let (orch, crew) = engine(StubCrew::default(), ExecutionMode::Immediate);

        let hello = orch.chat(Some("s3"), "Hello").await.unwrap();
        assert_eq!(hello.phases(), vec![Phase::AtlasPlan]);
        assert_eq!(hello.response[0].content(), "Hi! How can I help?");
        assert_eq!(crew.replies.load(Ordering::SeqCst), 0);

        let qa = orch.chat(Some("s3"), "What is the borrow checker?").await.unwrap();
        assert_eq!(qa.phases(), vec![Phase::AtlasPlan]);
        assert_eq!(qa.next_action, None);
        assert_eq!(crew.replies.load(Ordering::SeqCst), 1);
        assert_eq!(crew.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsafe_plan_never_starts_a_pipeline() {
        let crew = StubCrew {
            unsafe_plan: true,
            ..StubCrew::default()
        };
        let (orch, crew) = engine(crew, ExecutionMode::Immediate);
        let out = orch.chat(Some("s4"), TASK).await.unwrap();
        assert_eq!(out.phases(), vec![Phase::AtlasPlan, Phase::GrishaPrecheck]);
        assert_eq!(out.next_action, None);
        assert_eq!(crew.executions.load(Ordering::SeqCst), 0);

        let Fragment::GrishaPrecheck(pre) = &out.response[1] else {
            panic!("expected precheck");
        };
        assert!(!pre.is_safe);
    }

    #[tokio::test]
    async fn incomplete_verdict_requests_supplement() {
        let (orch, _) = engine(StubCrew::with_verdicts(&[false, true]), ExecutionMode::Staged);
        orch.chat(Some("s5"), TASK).await.unwrap();

        let first = orch.continue_session("s5").await.unwrap();
        assert_eq!(
            first.phases(),
            vec![Phase::Execution, Phase::GrishaVerdict, Phase::GrishaFollowup]
        );
        assert_eq!(first.next_action, Some(NextAction::TetyanaSupplement));
        let Fragment::GrishaFollowup(follow) = &first.response[2] else {
            panic!("expected followup");
        };
        assert_eq!(follow.iter, 1);
        assert!(!follow.gave_up);
        assert_eq!(follow.need, "show the file contents");

        let second = orch.continue_session("s5").await.unwrap();
        let Fragment::Execution(exec) = &second.response[0] else {
            panic!("expected execution");
        };
        assert_eq!(exec.supplement_for.as_deref(), Some("show the file contents"));
        assert_eq!(second.next_action, None);
    }

    #[tokio::test]
    async fn supplement_cycles_are_capped() {
        let crew = Arc::new(StubCrew::with_verdicts(&[false, false, false]));
        let config = EngineConfig {
            mode: ModeSource::Fixed(ExecutionMode::Staged),
            max_refinement_cycles: 1,
            ..EngineConfig::default()
        };
        let orch = Orchestrator::new(Arc::new(HeuristicClassifier), crew.clone(), config);
        orch.chat(Some("s6"), TASK).await.unwrap();

        let first = orch.continue_session("s6").await.unwrap();
        assert_eq!(first.next_action, Some(NextAction::TetyanaSupplement));

        let second = orch.continue_session("s6").await.unwrap();
        let Some(Fragment::GrishaFollowup(last)) = second.response.last() else {
            panic!("expected followup");
        };
        assert!(last.gave_up);
        assert_eq!(second.next_action, None);
        assert!(orch.continue_session("s6").await.is_err());
    }

    #[tokio::test]
    async fn failed_execution_keeps_next_action() {
        let crew = StubCrew {
            fail_execute: true,
            ..StubCrew::default()
        };
        let (orch, _) = engine(crew, ExecutionMode::Staged);
        orch.chat(Some("s7"), TASK).await.unwrap();

        let out = orch.continue_session("s7").await.unwrap();
        assert!(!out.success);
        assert!(out.response.is_empty());
        assert!(out.error.unwrap().contains("executor offline"));
        assert_eq!(out.next_action, Some(NextAction::TetyanaExecute));

        let handle = orch.sessions().get("s7").unwrap();
        let session = handle.lock().await;
        assert_eq!(session.stage(), Some(PipelineStage::Prechecked));
    }

    #[tokio::test]
    async fn new_task_supersedes_pending_pipeline() {
        let (orch, _) = engine(StubCrew::default(), ExecutionMode::Staged);
        orch.chat(Some("s8"), TASK).await.unwrap();

        // Chit-chat leaves the pending work alone.
        let hello = orch.chat(Some("s8"), "thanks").await.unwrap();
        assert_eq!(hello.next_action, Some(NextAction::TetyanaExecute));

        orch.chat(Some("s8"), "Delete the temp folder").await.unwrap();
        let handle = orch.sessions().get("s8").unwrap();
        let session = handle.lock().await;
        let pipeline = session.pipeline.as_ref().unwrap();
        assert_eq!(pipeline.user_message, "Delete the temp folder");
        assert_eq!(pipeline.iter, 0);
    }

    #[tokio::test]
    async fn failed_replacement_plan_keeps_pending_pipeline() {
        let crew = StubCrew {
            fail_plan_on: Some("Delete the temp folder"),
            ..StubCrew::default()
        };
        let (orch, _) = engine(crew, ExecutionMode::Staged);
        orch.chat(Some("s11"), TASK).await.unwrap();

        let err = orch.chat(Some("s11"), "Delete the temp folder").await.unwrap_err();
        assert!(matches!(err, AtlasError::ProviderUnavailable(_)));

        {
            let handle = orch.sessions().get("s11").unwrap();
            let session = handle.lock().await;
            assert_eq!(session.next_action(), Some(NextAction::TetyanaExecute));
            assert_eq!(session.pipeline.as_ref().unwrap().user_message, TASK);
        }

        let resumed = orch.continue_session("s11").await.unwrap();
        assert_eq!(resumed.phases(), vec![Phase::Execution, Phase::GrishaVerdict]);
        let Fragment::Execution(exec) = &resumed.response[0] else {
            panic!("expected execution");
        };
        assert_eq!(exec.content, format!("did: {TASK}"));
    }

    #[tokio::test]
    async fn vetoed_replacement_keeps_pending_pipeline() {
        let crew = StubCrew {
            veto_on: Some("Delete the temp folder"),
            ..StubCrew::default()
        };
        let (orch, _) = engine(crew, ExecutionMode::Staged);
        orch.chat(Some("s12"), TASK).await.unwrap();

        let out = orch.chat(Some("s12"), "Delete the temp folder").await.unwrap();
        assert_eq!(out.phases(), vec![Phase::AtlasPlan, Phase::GrishaPrecheck]);
        assert_eq!(out.next_action, Some(NextAction::TetyanaExecute));

        let handle = orch.sessions().get("s12").unwrap();
        let session = handle.lock().await;
        assert_eq!(session.pipeline.as_ref().unwrap().user_message, TASK);
    }

    #[tokio::test]
    async fn rejected_fragment_is_not_recorded_in_history() {
        let (orch, _) = engine(StubCrew::default(), ExecutionMode::Staged);
        let mut session = Session::new("s13");
        let mut log = FragmentLog::new();
        orch.emit(
            &mut session,
            &mut log,
            Fragment::GrishaVerdict(VerdictFragment {
                agent: AgentRole::Verifier,
                content: "done".into(),
                is_complete: true,
                confidence: 0.9,
                issues: vec![],
            }),
        )
        .unwrap();
        assert_eq!(session.history.len(), 1);

        let late = Fragment::AtlasPlan(PlanFragment {
            agent: AgentRole::Planner,
            content: "late plan".into(),
            intent: Intent::Actionable,
            steps: vec![],
        });
        assert!(orch.emit(&mut session, &mut log, late).is_err());
        assert_eq!(session.history.len(), 1);
        assert_eq!(log.phases(), vec![Phase::GrishaVerdict]);
    }

    #[tokio::test]
    #[serial]
    async fn env_mode_is_read_on_every_call() {
        let config = EngineConfig {
            mode: ModeSource::Env,
            ..EngineConfig::default()
        };
        let orch = Orchestrator::new(
            Arc::new(HeuristicClassifier),
            Arc::new(StubCrew::default()),
            config,
        );

        // SAFETY: the only test touching EXECUTION_MODE, and it runs serially.
        unsafe { std::env::set_var(EXECUTION_MODE_ENV, "immediate") };
        let first = orch.chat(Some("s14"), TASK).await.unwrap();
        assert_eq!(orch.execution_mode(), ExecutionMode::Immediate);

        unsafe { std::env::set_var(EXECUTION_MODE_ENV, "staged") };
        let second = orch.chat(Some("s14"), TASK).await.unwrap();
        assert_eq!(orch.execution_mode(), ExecutionMode::Staged);

        unsafe { std::env::remove_var(EXECUTION_MODE_ENV) };
        assert_eq!(orch.execution_mode(), ExecutionMode::Staged);

        assert_eq!(first.phases().len(), 4);
        assert_eq!(first.next_action, None);
        assert_eq!(second.phases(), vec![Phase::AtlasPlan, Phase::GrishaPrecheck]);
        assert_eq!(second.next_action, Some(NextAction::TetyanaExecute));
    }

    #[tokio::test]
    async fn continuation_of_unknown_session_is_invalid() {
        let (orch, _) = engine(StubCrew::default(), ExecutionMode::Staged);
        let err = orch.continue_session("ghost").await.unwrap_err();
        assert!(matches!(err, AtlasError::InvalidContinuation(_)));
        assert!(matches!(
            orch.continue_session("  ").await.unwrap_err(),
            AtlasError::MalformedRequest(_)
        ));
    }

    #[tokio::test]
    async fn classification_is_cached_per_normalized_text() {
        let (orch, _) = engine(StubCrew::default(), ExecutionMode::Staged);
        let (first, cached) = orch.classify("Hello").await;
        assert!(!cached);
        assert_eq!(first.intent, Intent::Smalltalk);
        let (_, cached) = orch.classify("  HELLO ").await;
        assert!(cached);
        assert_eq!(orch.intent_cache_stats().await.hits, 1);
    }

    #[tokio::test]
    async fn classifier_failure_defaults_to_qa_uncached() {
        let config = EngineConfig {
            mode: ModeSource::Fixed(ExecutionMode::Staged),
            ..EngineConfig::default()
        };
        let orch = Orchestrator::new(
            Arc::new(BrokenClassifier),
            Arc::new(StubCrew::default()),
            config,
        );
        let (c, cached) = orch.classify(TASK).await;
        assert_eq!(c.intent, Intent::Qa);
        assert!(!cached);
        let (_, cached) = orch.classify(TASK).await;
        assert!(!cached);
    }

    #[tokio::test]
    async fn missing_session_id_is_generated_and_empty_message_rejected() {
        let (orch, _) = engine(StubCrew::default(), ExecutionMode::Staged);
        let out = orch.chat(None, "Hello").await.unwrap();
        assert!(Uuid::parse_str(&out.session_id).is_ok());
        assert_eq!(orch.session_count(), 1);

        let err = orch.chat(Some("s9"), "   ").await.unwrap_err();
        assert!(matches!(err, AtlasError::MalformedRequest(_)));
        assert!(orch.sessions().get("s9").is_none());
    }

    #[tokio::test]
    async fn history_records_every_fragment() {
        let (orch, _) = engine(StubCrew::default(), ExecutionMode::Immediate);
        orch.chat(Some("s10"), TASK).await.unwrap();
        let handle = orch.sessions().get("s10").unwrap();
        let session = handle.lock().await;
        // user turn + four fragments
        assert_eq!(session.history.len(), 5);
        assert_eq!(session.current_agent, AgentRole::Verifier);
        assert!(session.is_idle());
    }

    #[test]
    fn outcome_serializes_in_camel_case() {
        let outcome = ChatOutcome {
            success: true,
            session_id: "s".into(),
            response: vec![],
            next_action: Some(NextAction::TetyanaExecute),
            error: None,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["sessionId"], "s");
        assert_eq!(json["nextAction"], "tetyana_execute");
        assert!(json.get("error").is_none());
    }
}
