//! Stage machine for actionable work: idle → prechecked → (needs_more)* → idle.
//!
//! These are the only writers of `Session::pipeline`.

use chrono::Utc;
use tracing::debug;

use atlas_core::{AtlasError, ExecutionMode, ExecutionReport, Intent, Plan, Precheck};

use crate::session_store::{PipelineRecord, PipelineStage, Session};

/// Both conditions must hold; non-actionable intents never execute.
pub fn should_immediate_execute(mode: ExecutionMode, intent: Intent) -> bool {
    mode == ExecutionMode::Immediate && intent.is_actionable()
}

impl Session {
    /// Park a freshly planned and prechecked task. Fails unless idle.
    pub fn start_actionable_pipeline(
        &mut self,
        user_message: &str,
        plan: Plan,
        precheck: Precheck,
    ) -> Result<(), AtlasError> {
        if let Some(existing) = &self.pipeline {
            return Err(AtlasError::PipelineBusy(format!(
                "{} (stage {})",
                self.id,
                existing.stage.as_str()
            )));
        }
        self.pipeline = Some(PipelineRecord {
            kind: Intent::Actionable,
            stage: PipelineStage::Prechecked,
            user_message: user_message.to_string(),
            atlas_plan: plan,
            grisha_pre: precheck,
            iter: 0,
            need: None,
            last_report: None,
            started_at: Utc::now(),
        });
        debug!(session_id = %self.id, "Pipeline started");
        Ok(())
    }

    /// Ask for a supplement. Does nothing on an idle session.
    pub fn mark_needs_more(&mut self, need: impl Into<String>, last_report: ExecutionReport) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };
        pipeline.stage = PipelineStage::NeedsMore;
        pipeline.need = Some(need.into());
        pipeline.last_report = Some(last_report);
        pipeline.iter += 1;
        debug!(session_id = %self.id, iter = pipeline.iter, "Pipeline needs more");
    }

    pub fn clear_pipeline(&mut self) {
        if self.pipeline.take().is_some() {
            debug!(session_id = %self.id, "Pipeline cleared");
        }
    }
}
