//! OpenAI chat completions backend.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::llm::{CallError, LlmRequest, LlmResponse, Message, Provider, ProviderKind};

const API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl OpenAiProvider {
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

impl Provider for OpenAiProvider {
    fn invoke(&self, request: &LlmRequest) -> Result<LlmResponse, CallError> {
        let body = ChatRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|err| classify_transport(self.kind(), &err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(self.kind(), status, response.text().ok()));
        }
        let parsed: ChatResponse = response
            .json()
            .map_err(|err| CallError::Other(format!("malformed openai response: {err}")))?;

        let content = parsed.choices.into_iter().next().and_then(|c| c.message.content);
        let (prompt_tokens, completion_tokens, tokens_exact) = match parsed.usage {
            Some(usage) => (usage.prompt_tokens, usage.completion_tokens, true),
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
        self.client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }
}

pub(crate) fn classify_transport(kind: ProviderKind, err: &reqwest::Error) -> CallError {
    if err.is_timeout() {
        CallError::Timeout(kind)
    } else {
        CallError::Network(kind, err.to_string())
    }
}

pub(crate) fn classify_status(
    kind: ProviderKind,
    status: StatusCode,
    body: Option<String>,
) -> CallError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CallError::InvalidCredentials(kind),
        StatusCode::TOO_MANY_REQUESTS => CallError::RateLimited(kind),
        status if status.is_server_error() => {
            CallError::Server(kind, summarize(status, body))
        }
        status => CallError::Other(format!("{kind} rejected the request: {}", summarize(status, body))),
    }
}

fn summarize(status: StatusCode, body: Option<String>) -> String {
    let body = body.unwrap_or_default();
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status.to_string()
    } else {
        let mut excerpt: String = trimmed.chars().take(200).collect();
        if excerpt.len() < trimmed.len() {
            excerpt.push_str("...");
        }
        format!("{status}: {excerpt}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let kind = ProviderKind::OpenAi;
        assert!(matches!(
            classify_status(kind, StatusCode::UNAUTHORIZED, None),
            CallError::InvalidCredentials(_)
        ));
        assert!(matches!(
            classify_status(kind, StatusCode::TOO_MANY_REQUESTS, None),
            CallError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(kind, StatusCode::BAD_GATEWAY, Some("upstream".to_string())),
            CallError::Server(_, _)
        ));
        assert!(matches!(
            classify_status(kind, StatusCode::BAD_REQUEST, None),
            CallError::Other(_)
        ));
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let err = classify_status(
            ProviderKind::OpenAi,
            StatusCode::INTERNAL_SERVER_ERROR,
            Some("x".repeat(500)),
        );
        let CallError::Server(_, detail) = err else {
            panic!("expected server error");
        };
        assert!(detail.len() < 300);
        assert!(detail.ends_with("..."));
    }
}
