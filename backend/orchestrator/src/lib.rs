//! Atlas orchestrator engine
//!
//! Intent caching, per-session state and the phase state machine that
//! decides how much of an actionable pipeline runs in each call.

pub mod engine;
pub mod fragment;
pub mod intent_cache;
pub mod pipeline;
pub mod session_store;

pub use engine::{ChatOutcome, EngineConfig, ModeSource, Orchestrator};
pub use fragment::{Fragment, FragmentLog};
pub use intent_cache::{CacheStats, IntentCache, normalize_key};
pub use pipeline::should_immediate_execute;
pub use session_store::{NextAction, PipelineRecord, PipelineStage, Session, SessionStore};
