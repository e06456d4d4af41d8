//! Anthropic messages backend.
//!
//! Differs from the chat-completions shape in two ways: the system prompt
//! rides in a top-level `system` field, and token estimation is denser than
//! the shared heuristic, with a safety margin on top.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::llm::openai::{classify_status, classify_transport};
use crate::llm::{CallError, LlmRequest, LlmResponse, Provider, ProviderKind, TokenEstimate};

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(serde::Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(serde::Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

impl AnthropicProvider {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, CallError> {
        Self::with_base_url(api_key, timeout, API_BASE.to_string())
    }

    pub fn with_base_url(
        api_key: String,
        timeout: Duration,
        base_url: String,
    ) -> Result<Self, CallError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CallError::Other(format!("http client: {err}")))?;
        Ok(Self { client, api_key, base_url })
    }
}

impl Provider for AnthropicProvider {
    fn invoke(&self, request: &LlmRequest) -> Result<LlmResponse, CallError> {
        let system = request
            .messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.as_str());
        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| WireMessage { role: &m.role, content: &m.content })
            .collect();
        let body = MessagesRequest {
            model: &request.model,
            system,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .map_err(|err| classify_transport(self.kind(), &err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(self.kind(), status, response.text().ok()));
        }
        let parsed: MessagesResponse = response
            .json()
            .map_err(|err| CallError::Other(format!("malformed anthropic response: {err}")))?;

        let content = {
            let text: String = parsed
                .content
                .iter()
                .filter_map(|block| block.text.as_deref())
                .collect();
            if text.is_empty() { None } else { Some(text) }
        };
        let (prompt_tokens, completion_tokens, tokens_exact) = match parsed.usage {
            Some(usage) => (usage.input_tokens, usage.output_tokens, true),
            None => {
                let estimated = content
                    .as_deref()
                    .map(|text| self.estimate_tokens(text).tokens)
                    .unwrap_or(0);
                (0, estimated, false)
            }
        };
        Ok(LlmResponse { content, prompt_tokens, completion_tokens, tokens_exact })
    }

    fn validate_credentials(&self) -> bool {
        // No cheap list endpoint; a one-token request against the smallest
        // viable payload works as a probe.
        let probe = MessagesRequest {
            model: "claude-sonnet-4-20250514",
            system: None,
            messages: vec![WireMessage { role: "user", content: "ping" }],
            temperature: 0.0,
            max_tokens: 1,
        };
        self.client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&probe)
            .send()
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }

    fn estimate_tokens(&self, text: &str) -> TokenEstimate {
        // Anthropic tokenization runs denser than 4 chars per token; divide
        // by 3.2 and add a 25% margin so budget checks stay conservative.
        let base = text.len() as f64 / 3.2;
        TokenEstimate { tokens: (base * 1.25).ceil() as u64 }
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }
}
