//! Intent classification: LLM first, keyword heuristics as a fallback.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use atlas_core::{AtlasError, Intent, LlmRequest};

use crate::parse::extract_json;
use crate::router::ProviderRouter;

/// Classifier result. `reply` is a ready-made answer for chit-chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
}

impl Classification {
    pub fn new(intent: Intent) -> Self {
        Self { intent, reply: None }
    }
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification, AtlasError>;
}

const CLASSIFIER_PROMPT: &str = "You route messages for a team of agents. \
Classify the user's message into exactly one intent:\n\
- actionable: the user wants something done on their machine (create, edit, run, install, open...)\n\
- planning: the user wants a plan, strategy or step-by-step approach, not execution\n\
- qa: a question that needs an informative answer\n\
- smalltalk: greetings, thanks, chit-chat\n\
Reply with JSON only: {\"intent\": \"...\", \"reply\": \"...\"}. \
Include \"reply\" only for smalltalk.";

#[derive(Deserialize)]
struct ClassifierReply {
    intent: String,
    #[serde(default)]
    reply: Option<String>,
}

/// Asks the routed LLM for an intent; falls back to keyword heuristics
/// when every provider fails or the reply cannot be parsed.
pub struct LlmIntentClassifier {
    router: Arc<ProviderRouter>,
    heuristic_fallback: bool,
}

impl LlmIntentClassifier {
    pub fn new(router: Arc<ProviderRouter>) -> Self {
        Self {
            router,
            heuristic_fallback: true,
        }
    }

    pub fn with_heuristic_fallback(mut self, enabled: bool) -> Self {
        self.heuristic_fallback = enabled;
        self
    }

    fn fallback(&self, text: &str, cause: AtlasError) -> Result<Classification, AtlasError> {
        if self.heuristic_fallback {
            warn!(error = %cause, "LLM classification failed, using heuristics");
            Ok(classify_heuristic(text))
        } else {
            Err(AtlasError::Classification(cause.to_string()))
        }
    }
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, AtlasError> {
        let request = LlmRequest::new(CLASSIFIER_PROMPT, text)
            .with_max_tokens(120)
            .with_temperature(0.0);

        let response = match self.router.complete(&request).await {
            Ok(response) => response,
            Err(e) => return self.fallback(text, e),
        };

        let Some(parsed) = extract_json::<ClassifierReply>(&response.content) else {
            return self.fallback(
                text,
                AtlasError::AgentOutput {
                    agent: "classifier".to_string(),
                    message: "reply was not JSON".to_string(),
                },
            );
        };

        match parsed.intent.parse::<Intent>() {
            Ok(intent) => {
                debug!(intent = %intent, provider = %response.provider, "Classified by LLM");
                let reply = match intent {
                    Intent::Smalltalk => parsed
                        .reply
                        .filter(|r| !r.trim().is_empty())
                        .or_else(|| smalltalk_reply(text)),
                    _ => None,
                };
                Ok(Classification { intent, reply })
            }
            Err(message) => self.fallback(
                text,
                AtlasError::AgentOutput {
                    agent: "classifier".to_string(),
                    message,
                },
            ),
        }
    }
}

/// Offline classifier; never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

#[async_trait]
impl IntentClassifier for HeuristicClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, AtlasError> {
        Ok(classify_heuristic(text))
    }
}

const HOW_TO_PHRASES: &[&str] = &[
    "how to",
    "how do i",
    "how can i",
    "як зробити",
    "як налаштувати",
    "як встановити",
];

/// Word stems that ask for something to be done.
const ACTION_STEMS: &[&str] = &[
    "create", "make", "write", "run", "execute", "open", "install", "delete", "remove", "edit",
    "update", "build", "deploy", "launch", "start", "stop", "restart", "download", "move",
    "copy", "rename", "fix", "generate", "save", "зроби", "створ", "запуст", "відкри", "встанов",
    "інстал", "видал", "онов", "напиш", "збер", "скопі", "перейменуй", "виправ", "налаштуй",
];

const PLANNING_STEMS: &[&str] = &["plan", "strategy", "roadmap", "план", "стратег"];

const GREETING_WORDS: &[&str] = &[
    "hi", "hello", "hey", "thanks", "thank", "bye", "ok", "okay", "привіт", "вітаю", "дякую",
    "бувай", "добрий", "ок",
];

/// Keyword classifier used when no LLM can answer.
pub fn classify_heuristic(text: &str) -> Classification {
    let lower = text.trim().to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let intent = if words.is_empty() {
        Intent::Smalltalk
    } else if HOW_TO_PHRASES.iter().any(|p| lower.contains(p)) {
        Intent::Planning
    } else if words
        .iter()
        .any(|w| ACTION_STEMS.iter().any(|stem| w.starts_with(stem)))
    {
        Intent::Actionable
    } else if words
        .iter()
        .any(|w| PLANNING_STEMS.iter().any(|stem| w.starts_with(stem)))
    {
        Intent::Planning
    } else if lower.chars().count() < 60
        && words.iter().any(|w| GREETING_WORDS.contains(w))
    {
        Intent::Smalltalk
    } else {
        Intent::Qa
    };

    let reply = match intent {
        Intent::Smalltalk => smalltalk_reply(text),
        _ => None,
    };
    Classification { intent, reply }
}

fn smalltalk_reply(text: &str) -> Option<String> {
    let cyrillic = text.chars().any(|c| ('\u{0400}'..='\u{04FF}').contains(&c));
    let reply = if cyrillic {
        "Привіт! Чим можу допомогти?"
    } else {
        "Hi! How can I help?"
    };
    Some(reply.to_string())
}
