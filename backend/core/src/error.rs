use thiserror::Error;

/// Top-level error type for the Atlas orchestrator.
#[derive(Debug, Error)]
pub enum AtlasError {
    #[error("intent classification unavailable: {0}")]
    Classification(String),

    #[error("no provider available: {0}")]
    ProviderUnavailable(String),

    #[error("LLM provider error ({provider}): {message}")]
    Llm { provider: String, message: String },

    #[error("nothing to continue for session {0}")]
    InvalidContinuation(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("session {0} already has an active pipeline")]
    PipelineBusy(String),

    #[error("could not interpret {agent} output: {message}")]
    AgentOutput { agent: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AtlasError {
    /// Stable machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AtlasError::Classification(_) => "classification_error",
            AtlasError::ProviderUnavailable(_) => "provider_unavailable",
            AtlasError::Llm { .. } => "llm_error",
            AtlasError::InvalidContinuation(_) => "invalid_continuation",
            AtlasError::MalformedRequest(_) => "malformed_request",
            AtlasError::PipelineBusy(_) => "pipeline_busy",
            AtlasError::AgentOutput { .. } => "agent_output",
            AtlasError::Other(_) => "internal",
        }
    }

    /// Whether the error was caused by the caller rather than by a backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AtlasError::InvalidContinuation(_)
                | AtlasError::MalformedRequest(_)
                | AtlasError::PipelineBusy(_)
        )
    }
}
