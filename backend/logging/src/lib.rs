//! Logging for the Atlas orchestrator.
//!
//! Console + rolling NDJSON file output, secret redaction, and the
//! structured pipeline event log.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{EventLogEntry, EventLogger, PipelineEvent};
pub use logger::init_logger;
pub use redact::redact_sensitive_data;
