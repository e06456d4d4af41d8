//! Retry policy for model calls: bounded attempts with exponential backoff,
//! capped at sixty seconds between attempts.

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::llm::{CallError, LlmRequest, LlmResponse, Provider};

const MAX_ATTEMPTS: u32 = 3;
const MAX_DELAY_SECS: u64 = 60;

/// Invoke the provider, retrying transient failures. Non-retryable errors
/// surface immediately.
pub fn invoke_with_retry(
    provider: &dyn Provider,
    request: &LlmRequest,
) -> Result<LlmResponse, CallError> {
    let mut attempt = 0;
    loop {
        match provider.invoke(request) {
            Ok(response) => return Ok(response),
            Err(err) if err.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                let delay = backoff(attempt);
                warn!(
                    provider = %provider.kind(),
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "model call failed, retrying"
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(MAX_DELAY_SECS.min(2u64.saturating_pow(attempt)))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::llm::{ProviderKind, TokenEstimate};

    struct FlakyProvider {
        calls: Cell<u32>,
        fail_first: u32,
        error: fn() -> CallError,
    }

    impl Provider for FlakyProvider {
        fn invoke(&self, _request: &LlmRequest) -> Result<LlmResponse, CallError> {
            let n = self.calls.get();
            self.calls.set(n + 1);
            if n < self.fail_first {
                Err((self.error)())
            } else {
                Ok(LlmResponse {
                    content: Some("ok".to_string()),
                    prompt_tokens: 1,
                    completion_tokens: 1,
                    tokens_exact: true,
                })
            }
        }

        fn validate_credentials(&self) -> bool {
            true
        }

        fn estimate_tokens(&self, _text: &str) -> TokenEstimate {
            TokenEstimate { tokens: 1 }
        }

        fn kind(&self) -> ProviderKind {
            ProviderKind::OpenAi
        }
    }

    fn request() -> LlmRequest {
        LlmRequest {
            model: "m".to_string(),
            messages: vec![],
            temperature: 0.0,
            max_tokens: 16,
        }
    }

    #[test]
    fn transient_failures_are_retried() {
        let provider = FlakyProvider {
            calls: Cell::new(0),
            fail_first: 2,
            error: || CallError::RateLimited(ProviderKind::OpenAi),
        };
        let response = invoke_with_retry(&provider, &request()).expect("succeeds on third try");
        assert_eq!(response.content.as_deref(), Some("ok"));
        assert_eq!(provider.calls.get(), 3);
    }

    #[test]
    fn attempts_are_bounded() {
        let provider = FlakyProvider {
            calls: Cell::new(0),
            fail_first: u32::MAX,
            error: || CallError::Network(ProviderKind::OpenAi, "reset".to_string()),
        };
        assert!(invoke_with_retry(&provider, &request()).is_err());
        assert_eq!(provider.calls.get(), 3);
    }

    #[test]
    fn credential_failures_are_not_retried() {
        let provider = FlakyProvider {
            calls: Cell::new(0),
            fail_first: u32::MAX,
            error: || CallError::InvalidCredentials(ProviderKind::OpenAi),
        };
        assert!(invoke_with_retry(&provider, &request()).is_err());
        assert_eq!(provider.calls.get(), 1);
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff(0), Duration::from_secs(1));
        assert_eq!(backoff(1), Duration::from_secs(2));
        assert_eq!(backoff(10), Duration::from_secs(60));
    }
}
