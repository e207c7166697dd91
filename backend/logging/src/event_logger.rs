//! Pipeline event log.
//!
//! One structured record per pipeline transition, emitted under the
//! `pipeline_events` target so it can be filtered into its own stream.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::redact::redact_sensitive_data;

/// Logged fragment text is cut to this many characters.
const MAX_CONTENT_CHARS: usize = 500;

pub const EVENT_TARGET: &str = "pipeline_events";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A response fragment was produced.
    PhaseEmitted {
        phase: String,
        agent: String,
        content: String,
    },
    /// The session pipeline moved between stages; `None` is idle.
    StageChanged {
        from: Option<String>,
        to: Option<String>,
        iter: u32,
    },
    /// Pending work was dropped without a verdict.
    PipelineAbandoned { reason: String },
    Error { message: String },
}

#[derive(Debug, Serialize)]
pub struct EventLogEntry {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub event: PipelineEvent,
}

impl EventLogEntry {
    /// Build a redacted entry ready for output.
    pub fn new(session_id: &str, mut event: PipelineEvent) -> Self {
        match &mut event {
            PipelineEvent::PhaseEmitted { content, .. } => {
                *content = redact_sensitive_data(content)
                    .chars()
                    .take(MAX_CONTENT_CHARS)
                    .collect();
            }
            PipelineEvent::PipelineAbandoned { reason } => {
                *reason = redact_sensitive_data(reason);
            }
            PipelineEvent::Error { message } => {
                *message = redact_sensitive_data(message);
            }
            PipelineEvent::StageChanged { .. } => {}
        }
        Self {
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            event,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EventLogger;

impl EventLogger {
    pub fn log_event(&self, session_id: &str, event: PipelineEvent) {
        let entry = EventLogEntry::new(session_id, event);
        match serde_json::to_string(&entry) {
            Ok(json) => info!(target: EVENT_TARGET, session_id = %entry.session_id, event = %json, "Pipeline event"),
            Err(e) => info!(target: EVENT_TARGET, session_id = %entry.session_id, error = %e, "Unserializable pipeline event"),
        }
    }
}
