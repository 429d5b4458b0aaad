use thiserror::Error;

use crate::agents::config::ProviderKind;
use crate::agents::retry::{self, FailureClass};

/// Upper bound on how much of an upstream error body is kept in messages.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// One candidate model tried by the multi-model provider and why it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFailure {
    pub model: String,
    pub error: String,
}

/// One provider abandoned by the gateway and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub provider: ProviderKind,
    pub error: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{provider} API key is not configured")]
    ConfigMissing { provider: ProviderKind },
    #[error("{}", transient_message(.provider, .status, .message))]
    Transient {
        provider: ProviderKind,
        status: Option<u16>,
        message: String,
    },
    #[error("{provider} error ({status}): {message}")]
    Auth {
        provider: ProviderKind,
        status: u16,
        message: String,
    },
    #[error("{provider} error ({status}): {message}")]
    NonRetryable {
        provider: ProviderKind,
        status: u16,
        message: String,
    },
    #[error("{provider} returned a malformed response: {reason}")]
    MalformedResponse {
        provider: ProviderKind,
        reason: String,
    },
    #[error("{provider} failed after {} attempt(s). {}", .attempts.len(), join_models(.attempts))]
    ModelsExhausted {
        provider: ProviderKind,
        attempts: Vec<ModelFailure>,
    },
    #[error("all AI providers failed. {}", join_providers(.failures))]
    AllProvidersExhausted { failures: Vec<ProviderFailure> },
}

impl GatewayError {
    /// Build the typed failure for a non-success HTTP status.
    pub fn from_status(provider: ProviderKind, status: u16, body: &str) -> Self {
        let message = truncate(body.trim());
        match retry::classify(Some(status), &message) {
            FailureClass::Auth => Self::Auth {
                provider,
                status,
                message,
            },
            FailureClass::Transient => Self::Transient {
                provider,
                status: Some(status),
                message,
            },
            FailureClass::NonRetryable => Self::NonRetryable {
                provider,
                status,
                message,
            },
        }
    }

    /// Failure with no status at all: connection refused, timeout, TLS.
    /// The URL is dropped from the message since some providers carry the
    /// API key in the query string.
    pub fn transport(provider: ProviderKind, err: reqwest::Error) -> Self {
        Self::Transient {
            provider,
            status: None,
            message: truncate(&err.without_url().to_string()),
        }
    }

    pub fn malformed(provider: ProviderKind, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            provider,
            reason: reason.into(),
        }
    }

    /// HTTP-like status carried by the failure, when the upstream sent one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } => *status,
            Self::Auth { status, .. } | Self::NonRetryable { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn provider(&self) -> Option<ProviderKind> {
        match self {
            Self::ConfigMissing { provider }
            | Self::Transient { provider, .. }
            | Self::Auth { provider, .. }
            | Self::NonRetryable { provider, .. }
            | Self::MalformedResponse { provider, .. }
            | Self::ModelsExhausted { provider, .. } => Some(*provider),
            Self::AllProvidersExhausted { .. } => None,
        }
    }

    /// Models the multi-model provider went through before giving up.
    pub fn models_attempted(&self) -> Option<Vec<String>> {
        match self {
            Self::ModelsExhausted { attempts, .. } => {
                Some(attempts.iter().map(|a| a.model.clone()).collect())
            }
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigMissing { .. } => "AI-1001",
            Self::Transient { .. } => "AI-1002",
            Self::Auth { .. } => "AI-1003",
            Self::NonRetryable { .. } => "AI-1004",
            Self::MalformedResponse { .. } => "AI-1005",
            Self::ModelsExhausted { .. } => "AI-1006",
            Self::AllProvidersExhausted { .. } => "AI-1099",
        }
    }

    pub fn explain(&self) -> &'static str {
        match self {
            Self::ConfigMissing { .. } => "No API key is available for the provider from the store or the environment.",
            Self::Transient { .. } => "The provider failed in a way that another model or a later call may not.",
            Self::Auth { .. } => "The provider rejected the credential; other models would fail the same way.",
            Self::NonRetryable { .. } => "The provider rejected the request itself.",
            Self::MalformedResponse { .. } => "Structured output was requested but the reply held no valid JSON.",
            Self::ModelsExhausted { .. } => "Every candidate model of the multi-model provider failed.",
            Self::AllProvidersExhausted { .. } => "Every provider in the failover chain failed.",
        }
    }

    /// Text suitable for end users. Provider internals stay in `Display`.
    pub fn user_message(&self) -> String {
        match self {
            Self::AllProvidersExhausted { .. } => {
                "The AI assistant is unavailable right now. Please try again in a few minutes."
                    .to_string()
            }
            other => other.to_string(),
        }
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

fn transient_message(provider: &ProviderKind, status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("{provider} error ({code}): {message}"),
        None => format!("{provider} request failed: {message}"),
    }
}

fn join_models(attempts: &[ModelFailure]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.model, a.error))
        .collect::<Vec<_>>()
        .join(" | ")
}

fn join_providers(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.provider.id(), f.error))
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_status_embeds_provider_and_code() {
        let err = GatewayError::from_status(ProviderKind::OpenRouter, 429, "slow down");
        assert_eq!(err.to_string(), "OpenRouter error (429): slow down");
        assert_eq!(err.status_code(), Some(429));
        assert!(matches!(err, GatewayError::Transient { .. }));
    }

    #[test]
    fn from_status_classifies_auth_and_client_errors() {
        assert!(matches!(
            GatewayError::from_status(ProviderKind::Claude, 401, "bad key"),
            GatewayError::Auth { status: 401, .. }
        ));
        assert!(matches!(
            GatewayError::from_status(ProviderKind::OpenAi, 422, "bad body"),
            GatewayError::NonRetryable { status: 422, .. }
        ));
    }

    #[test]
    fn error_bodies_are_truncated() {
        let body = "x".repeat(2_000);
        let err = GatewayError::from_status(ProviderKind::Gemini, 500, &body);
        match err {
            GatewayError::Transient { message, .. } => assert_eq!(message.len(), 500),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn exhaustion_lists_every_provider() {
        let err = GatewayError::AllProvidersExhausted {
            failures: vec![
                ProviderFailure {
                    provider: ProviderKind::OpenRouter,
                    error: "boom".into(),
                },
                ProviderFailure {
                    provider: ProviderKind::Claude,
                    error: "Claude API key is not configured".into(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("openrouter: boom"));
        assert!(text.contains("claude: Claude API key is not configured"));
        assert_eq!(err.code(), "AI-1099");
        assert!(!err.user_message().contains("openrouter"));
    }

    #[test]
    fn models_exhausted_reports_attempts() {
        let err = GatewayError::ModelsExhausted {
            provider: ProviderKind::OpenRouter,
            attempts: vec![
                ModelFailure {
                    model: "a".into(),
                    error: "x".into(),
                },
                ModelFailure {
                    model: "b".into(),
                    error: "y".into(),
                },
            ],
        };
        assert_eq!(err.to_string(), "OpenRouter failed after 2 attempt(s). a: x | b: y");
        assert_eq!(err.models_attempted(), Some(vec!["a".to_string(), "b".to_string()]));
    }
}
