//! Shared vocabulary for the Atlas orchestrator: intents, phases, agent
//! artifacts, the error taxonomy and the provider trait.

pub mod error;
pub mod message;
pub mod traits;
pub mod types;

pub use error::AtlasError;
pub use message::{ChatTurn, Evidence, ExecutionReport, Plan, Precheck, TurnRole, Verification};
pub use traits::{LlmProvider, LlmRequest, LlmResponse};
pub use types::{AgentRole, ExecutionMode, Intent, Phase};
