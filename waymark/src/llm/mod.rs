//! Provider-agnostic model call layer.
//!
//! Each backend implements [`Provider`]; everything above this module talks
//! in [`LlmRequest`] and [`LlmResponse`] and never sees provider wire
//! formats. Failures are classified into [`CallError`] so the retry policy
//! and the engine can tell transient faults from hard ones.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

mod anthropic;
mod google;
mod openai;
mod retry;

pub use anthropic::AnthropicProvider;
pub use google::GoogleProvider;
pub use openai::OpenAiProvider;
pub use retry::invoke_with_retry;

/// Which backend a project is configured to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
        }
    }

    /// Environment variable holding this backend's API key.
    pub fn api_key_var(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Google => "GOOGLE_API_KEY",
        }
    }
}

impl Default for ProviderKind {
    fn default() -> Self {
        Self::OpenAi
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "google" => Ok(Self::Google),
            other => Err(format!(
                "unknown provider '{other}' (expected openai, anthropic, or google)"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// A completed call. `tokens_exact` is false when the backend did not report
/// usage and the counts fell back to estimation.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub tokens_exact: bool,
}

/// Pre-call token estimate for budget checks.
#[derive(Debug, Clone, Copy)]
pub struct TokenEstimate {
    pub tokens: u64,
}

/// Classified call failure.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("invalid or missing credentials for {0}")]
    InvalidCredentials(ProviderKind),
    #[error("rate limited by {0}")]
    RateLimited(ProviderKind),
    #[error("{0} returned a server error: {1}")]
    Server(ProviderKind, String),
    #[error("network error calling {0}: {1}")]
    Network(ProviderKind, String),
    #[error("call to {0} timed out")]
    Timeout(ProviderKind),
    #[error("{0}")]
    Other(String),
}

impl CallError {
    /// Rate limits, server faults, network faults, and timeouts are worth
    /// retrying. Credential failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Server(_, _) | Self::Network(_, _) | Self::Timeout(_)
        )
    }
}

/// One model backend. Implementations hold their own HTTP client and key.
pub trait Provider {
    fn invoke(&self, request: &LlmRequest) -> Result<LlmResponse, CallError>;

    /// Cheap credential probe used before starting a run.
    fn validate_credentials(&self) -> bool;

    /// Estimate the token count of raw text for pre-call budget checks.
    fn estimate_tokens(&self, text: &str) -> TokenEstimate {
        // Rough chars-per-token heuristic; backends override where their
        // tokenizer density differs.
        TokenEstimate { tokens: (text.len() as u64).div_ceil(4) }
    }

    fn kind(&self) -> ProviderKind;
}

/// Build the configured backend, reading its API key from the environment.
pub fn build_provider(
    kind: ProviderKind,
    timeout: Duration,
) -> Result<Box<dyn Provider>, CallError> {
    let key = std::env::var(kind.api_key_var())
        .map_err(|_| CallError::InvalidCredentials(kind))?;
    if key.trim().is_empty() {
        return Err(CallError::InvalidCredentials(kind));
    }
    let provider: Box<dyn Provider> = match kind {
        ProviderKind::OpenAi => Box::new(OpenAiProvider::new(key, timeout)?),
        ProviderKind::Anthropic => Box::new(AnthropicProvider::new(key, timeout)?),
        ProviderKind::Google => Box::new(GoogleProvider::new(key, timeout)?),
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_round_trips_through_str() {
        for kind in [ProviderKind::OpenAi, ProviderKind::Anthropic, ProviderKind::Google] {
            assert_eq!(kind.as_str().parse::<ProviderKind>(), Ok(kind));
        }
        assert!("azure".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn retryability_split() {
        assert!(CallError::RateLimited(ProviderKind::OpenAi).is_retryable());
        assert!(CallError::Timeout(ProviderKind::Google).is_retryable());
        assert!(!CallError::InvalidCredentials(ProviderKind::Anthropic).is_retryable());
        assert!(!CallError::Other("bad payload".to_string()).is_retryable());
    }
}
