//! Failure classification for the multi-model provider loop.
//!
//! Adapters carry the upstream status natively on [`GatewayError`], so the
//! classifier only looks at the number and, for `400`, the message text.

use crate::errors::GatewayError;

/// Coarse failure class derived from an upstream status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Rate limits, timeouts, server faults and unknown-model rejections.
    Transient,
    /// The credential is the problem, not the model.
    Auth,
    NonRetryable,
}

/// What the multi-model loop should do after a failed model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NextModel,
    AbortProvider,
    /// The failure did not come from a model call at all.
    NotApplicable,
}

pub fn classify(status: Option<u16>, message: &str) -> FailureClass {
    let Some(status) = status else {
        return FailureClass::Transient;
    };
    match status {
        401 | 403 => FailureClass::Auth,
        408 | 429 | 500..=599 => FailureClass::Transient,
        400 if mentions_model_problem(message) => FailureClass::Transient,
        _ => FailureClass::NonRetryable,
    }
}

pub fn decide(err: &GatewayError) -> RetryDecision {
    match err {
        GatewayError::Transient { .. } | GatewayError::MalformedResponse { .. } => {
            RetryDecision::NextModel
        }
        GatewayError::Auth { .. } | GatewayError::NonRetryable { .. } => {
            RetryDecision::AbortProvider
        }
        GatewayError::ConfigMissing { .. }
        | GatewayError::ModelsExhausted { .. }
        | GatewayError::AllProvidersExhausted { .. } => RetryDecision::NotApplicable,
    }
}

// Some upstreams answer an unknown or unavailable model id with a plain 400.
fn mentions_model_problem(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["model", "not found", "no such", "invalid"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::config::ProviderKind;

    #[test]
    fn missing_status_is_optimistically_retried() {
        assert_eq!(classify(None, "connection reset"), FailureClass::Transient);
    }

    #[test]
    fn credential_failures_abort() {
        assert_eq!(classify(Some(401), "model gone"), FailureClass::Auth);
        assert_eq!(classify(Some(403), ""), FailureClass::Auth);
    }

    #[test]
    fn transient_statuses() {
        for status in [408, 429, 500, 502, 503, 599] {
            assert_eq!(classify(Some(status), ""), FailureClass::Transient, "{status}");
        }
    }

    #[test]
    fn bad_request_depends_on_message() {
        assert_eq!(
            classify(Some(400), "anthropic/claude-9 is not a valid Model ID"),
            FailureClass::Transient
        );
        assert_eq!(classify(Some(400), "No such endpoint"), FailureClass::Transient);
        assert_eq!(
            classify(Some(400), "max_tokens must be positive"),
            FailureClass::NonRetryable
        );
    }

    #[test]
    fn other_client_errors_are_final() {
        for status in [402, 404, 409, 422] {
            assert_eq!(classify(Some(status), "model"), FailureClass::NonRetryable);
        }
    }

    #[test]
    fn decisions_follow_error_variants() {
        let provider = ProviderKind::OpenRouter;
        assert_eq!(
            decide(&GatewayError::from_status(provider, 503, "")),
            RetryDecision::NextModel
        );
        assert_eq!(
            decide(&GatewayError::malformed(provider, "no JSON found")),
            RetryDecision::NextModel
        );
        assert_eq!(
            decide(&GatewayError::from_status(provider, 403, "")),
            RetryDecision::AbortProvider
        );
        assert_eq!(
            decide(&GatewayError::from_status(provider, 404, "")),
            RetryDecision::AbortProvider
        );
        assert_eq!(
            decide(&GatewayError::ConfigMissing { provider }),
            RetryDecision::NotApplicable
        );
    }
}
