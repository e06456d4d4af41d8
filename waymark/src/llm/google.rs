//! Google Gemini backend.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::llm::openai::{classify_status, classify_transport};
use crate::llm::{CallError, LlmRequest, LlmResponse, Provider, ProviderKind};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GoogleProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(serde::Serialize)]
struct GenerateRequest<'a> {
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(serde::Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(serde::Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(serde::Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
}

impl GoogleProvider {
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

impl Provider for GoogleProvider {
    fn invoke(&self, request: &LlmRequest) -> Result<LlmResponse, CallError> {
        let system_instruction = request
            .messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| Content { role: None, parts: vec![Part { text: &m.content }] });
        let contents = request
            .messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| Content {
                // Gemini calls the assistant role "model".
                role: Some(if m.role == "assistant" { "model" } else { "user" }),
                parts: vec![Part { text: &m.content }],
            })
            .collect();
        let body = GenerateRequest {
            system_instruction,
            contents,
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        };
        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent?key={}",
                self.base_url, request.model, self.api_key
            ))
            .json(&body)
            .send()
            .map_err(|err| classify_transport(self.kind(), &err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(self.kind(), status, response.text().ok()));
        }
        let parsed: GenerateResponse = response
            .json()
            .map_err(|err| CallError::Other(format!("malformed google response: {err}")))?;

        let content = {
            let text: String = parsed
                .candidates
                .into_iter()
                .next()
                .and_then(|candidate| candidate.content)
                .map(|content| {
                    content
                        .parts
                        .into_iter()
                        .filter_map(|part| part.text)
                        .collect()
                })
                .unwrap_or_default();
            if text.is_empty() { None } else { Some(text) }
        };
        let (prompt_tokens, completion_tokens, tokens_exact) = match parsed.usage_metadata {
            Some(usage) => (usage.prompt_token_count, usage.candidates_token_count, true),
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
            .get(format!("{}/models?key={}", self.base_url, self.api_key))
            .send()
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }
}
