use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use atlas_core::{LlmProvider, LlmRequest, LlmResponse};

/// A mock LLM provider with scripted replies.
///
/// Scripted outcomes are consumed first; once exhausted the provider keeps
/// answering with the fixed response (or fails, if built with `failing`).
pub struct MockProvider {
    name: String,
    fixed_response: Option<String>,
    always_fail: bool,
    script: Mutex<VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fixed_response: None,
            always_fail: false,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// A provider whose every call fails.
    pub fn failing(name: impl Into<String>) -> Self {
        Self {
            always_fail: true,
            ..Self::new(name)
        }
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.fixed_response = Some(response.into());
        self
    }

    /// Queue one successful reply.
    pub fn then_reply(self, response: impl Into<String>) -> Self {
        self.push(Ok(response.into()));
        self
    }

    /// Queue one failure.
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.push(Err(message.into()));
        self
    }

    /// Number of `complete` calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn push(&self, outcome: Result<String, String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(outcome);
        }
    }

    fn next_outcome(&self) -> Result<String, String> {
        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match scripted {
            Some(outcome) => outcome,
            None if self.always_fail => Err(format!("{} is down", self.name)),
            None => Ok(self
                .fixed_response
                .clone()
                .unwrap_or_else(|| "Mock response".to_string())),
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, req: &LlmRequest) -> Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = self.next_outcome().map_err(|e| anyhow!(e))?;
        Ok(LlmResponse {
            content,
            provider: self.name.clone(),
            model: if req.model.is_empty() { "mock".to_string() } else { req.model.clone() },
            tokens_used: 0,
            latency_ms: 0,
        })
    }
}
