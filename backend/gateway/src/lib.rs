//! Atlas Gateway HTTP API Server
//!
//! Chat, continuation, intent lookup, the agent roster, provider breaker
//! state and health.

pub mod agents_api;
pub mod chat_api;
pub mod error;
pub mod health_api;
pub mod intent_api;
pub mod server;

pub use error::ApiError;
pub use server::{GatewayState, build_router, serve, start_server};
