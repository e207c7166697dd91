//! Chat-completions provider for the OpenAI wire format.
//!
//! Covers both the local fallback server and Ollama, which serves the same
//! format under `/v1`. Each agent call is a system prompt (the role) plus
//! one user prompt (the rendered task and history).

use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use atlas_core::{LlmProvider, LlmRequest, LlmResponse};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const OLLAMA_MODEL: &str = "llama3.1";
const FALLBACK_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiCompatProvider {
    client: Client,
    name: String,
    /// Everything before `/chat/completions`.
    endpoint: String,
    api_key: Option<String>,
    default_model: String,
    /// Ollama tags have no `vendor/` namespace.
    bare_model_names: bool,
}

impl OpenAiCompatProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            name: name.into(),
            endpoint: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            default_model: FALLBACK_MODEL.to_string(),
            bare_model_names: false,
        }
    }

    /// A local Ollama daemon, given its root URL (no `/v1`).
    pub fn ollama(root_url: &str) -> Self {
        let root = root_url.trim_end_matches('/');
        let mut provider = Self::new("ollama", format!("{root}/v1"));
        provider.default_model = OLLAMA_MODEL.to_string();
        provider.bare_model_names = true;
        provider
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        self.api_key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    fn model_for<'a>(&'a self, request: &'a LlmRequest) -> &'a str {
        let requested = request.model.as_str();
        if requested.is_empty() {
            &self.default_model
        } else if self.bare_model_names {
            requested.rsplit('/').next().unwrap_or(requested)
        } else {
            requested
        }
    }

    fn body<'a>(&'a self, request: &'a LlmRequest) -> CompletionBody<'a> {
        let system = (!request.system_prompt.is_empty()).then(|| WireMessage {
            role: "system",
            content: &request.system_prompt,
        });
        let user = WireMessage {
            role: "user",
            content: &request.user_prompt,
        };
        CompletionBody {
            model: self.model_for(request),
            messages: system.into_iter().chain([user]).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: false,
        }
    }
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionReply {
    #[serde(default)]
    choices: Vec<ReplyChoice>,
    usage: Option<ReplyUsage>,
}

#[derive(Deserialize)]
struct ReplyChoice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct ReplyUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    total_tokens: Option<u64>,
}

impl CompletionReply {
    /// First choice's text and the token count, preferring `total_tokens`.
    fn into_parts(self) -> Result<(String, u64)> {
        let usage = self.usage.unwrap_or_default();
        let tokens = usage
            .total_tokens
            .unwrap_or(usage.prompt_tokens + usage.completion_tokens);
        let content = self
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .context("completion carried no choices")?;
        Ok((content, tokens))
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let start = Instant::now();
        let body = self.body(request);
        debug!(provider = %self.name, model = body.model, "Sending chat completion");

        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response = http
            .send()
            .await
            .with_context(|| format!("{} unreachable at {}", self.name, self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("{} answered {status}: {detail}", self.name);
        }

        let reply: CompletionReply = response
            .json()
            .await
            .with_context(|| format!("{} sent an unreadable completion", self.name))?;
        let (content, tokens_used) = reply.into_parts()?;

        Ok(LlmResponse {
            content,
            provider: self.name.clone(),
            model: body.model.to_string(),
            tokens_used,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// One-shot HTTP server: answers `reply` and hands back the raw request.
    async fn serve_once(reply: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                reply.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&raw).to_string()
        });
        (url, handle)
    }

    const REPLY: &str =
        r#"{"choices":[{"message":{"role":"assistant","content":"done"}}],"usage":{"prompt_tokens":7,"completion_tokens":5}}"#;

    #[test]
    fn ollama_targets_v1_and_strips_vendor_prefix() {
        let provider = OpenAiCompatProvider::ollama("http://host:11434/");
        assert_eq!(provider.endpoint, "http://host:11434/v1");
        assert_eq!(provider.name(), "ollama");

        let mut req = LlmRequest::new("", "hi");
        assert_eq!(provider.model_for(&req), "llama3.1");
        req.model = "meta/llama3.1:8b".into();
        assert_eq!(provider.model_for(&req), "llama3.1:8b");

        let fallback = OpenAiCompatProvider::new("fallback", "http://127.0.0.1:3010/v1");
        assert_eq!(fallback.model_for(&req), "meta/llama3.1:8b");
    }

    #[test]
    fn empty_api_key_is_ignored() {
        let provider = OpenAiCompatProvider::new("fallback", "http://127.0.0.1:3010/v1/")
            .with_api_key("");
        assert!(provider.api_key.is_none());
        assert_eq!(provider.endpoint, "http://127.0.0.1:3010/v1");
    }

    #[test]
    fn system_prompt_is_omitted_when_empty() {
        let provider = OpenAiCompatProvider::new("fallback", "http://x");
        let json = serde_json::to_value(provider.body(&LlmRequest::new("", "hi"))).unwrap();
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn reply_without_choices_is_an_error() {
        let reply: CompletionReply = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(reply.into_parts().is_err());
    }

    #[tokio::test]
    async fn completes_against_a_live_endpoint() {
        let (url, server) = serve_once(REPLY).await;
        let provider = OpenAiCompatProvider::new("fallback", format!("{url}/v1"))
            .with_api_key("sk-test")
            .with_model("local-model");

        let response = provider
            .complete(&LlmRequest::new("You are Atlas.", "plan it"))
            .await
            .unwrap();
        assert_eq!(response.content, "done");
        assert_eq!(response.provider, "fallback");
        assert_eq!(response.model, "local-model");
        assert_eq!(response.tokens_used, 12);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/chat/completions"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer sk-test"));
        assert!(request.contains(r#""content":"You are Atlas.""#));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        let provider = OpenAiCompatProvider::new("fallback", "http://127.0.0.1:9");
        assert!(provider.complete(&LlmRequest::new("", "hi")).await.is_err());
    }
}
