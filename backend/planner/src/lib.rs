pub mod circuit_breaker;
pub mod classifier;
pub mod crew;
pub mod evidence;
pub mod parse;
pub mod providers;
pub mod router;

pub use circuit_breaker::{BreakerBoard, BreakerSnapshot, CircuitBreaker};
pub use classifier::{Classification, HeuristicClassifier, IntentClassifier, LlmIntentClassifier};
pub use crew::{AgentCrew, LlmCrew};
pub use evidence::extract_evidence;
pub use providers::ProviderRegistry;
pub use router::ProviderRouter;
