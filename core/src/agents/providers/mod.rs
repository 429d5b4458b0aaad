//! Upstream completion services and the call paths that drive them.
//!
//! An adapter only knows how to make one call with one model. The two call
//! paths on top decide how many calls a provider gets: [`call_candidates`]
//! walks a candidate list with retry classification, [`call_single`] makes
//! exactly one call.

mod claude;
mod gemini;
mod openai;
mod openrouter;

pub use claude::ClaudeAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;
pub use openrouter::OpenRouterAdapter;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use super::config::{ProviderConfig, ProviderKind};
use super::json::extract_json;
use super::policy::ModelCandidateList;
use super::request::{CompletionRequest, CompletionResult};
use super::retry::{self, RetryDecision};
use crate::audit::{AuditEmitter, AuditRecord, ProviderAttempt};
use crate::errors::{GatewayError, ModelFailure};
use crate::settings::GatewaySettings;

/// Appended to system instructions for providers without a native JSON mode.
pub(crate) const JSON_ONLY_INSTRUCTION: &str = "Respond ONLY with valid JSON, with no extra text.";

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Model used when no override is configured.
    fn default_model(&self) -> &str;

    /// Whether this provider walks a candidate list instead of one model.
    fn multi_model(&self) -> bool {
        false
    }

    /// One upstream call. Text is returned raw; JSON extraction happens in
    /// the call paths.
    async fn send(
        &self,
        request: &CompletionRequest,
        model: &str,
        api_key: &str,
    ) -> Result<CompletionResult, GatewayError>;
}

pub fn http_client(settings: &GatewaySettings) -> Result<Client> {
    Client::builder()
        .timeout(settings.request_timeout)
        .user_agent(concat!("ai-gateway/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to construct HTTP client")
}

/// The four upstreams in failover priority order, sharing one client.
pub fn default_adapters(settings: &GatewaySettings) -> Result<Vec<Arc<dyn ProviderAdapter>>> {
    let client = http_client(settings)?;
    Ok(vec![
        Arc::new(OpenRouterAdapter::from_settings(client.clone(), settings)),
        Arc::new(ClaudeAdapter::new(
            client.clone(),
            settings.base_url(ProviderKind::Claude),
        )),
        Arc::new(OpenAiAdapter::new(
            client.clone(),
            settings.base_url(ProviderKind::OpenAi),
        )),
        Arc::new(GeminiAdapter::new(client, settings.base_url(ProviderKind::Gemini))),
    ])
}

/// Try each candidate in order until one succeeds or the classifier says to
/// stop. Every model attempt is audited.
pub async fn call_candidates(
    adapter: &dyn ProviderAdapter,
    request: &CompletionRequest,
    models: &ModelCandidateList,
    config: &ProviderConfig,
    audit: &AuditEmitter,
) -> Result<CompletionResult, GatewayError> {
    let kind = adapter.kind();
    let api_key = require_key(kind, config)?;
    let mut tried = Vec::new();

    for model in models {
        let started = Instant::now();
        let outcome = match adapter.send(request, model, api_key).await {
            Ok(result) => attach_json(kind, result, request.wants_json),
            Err(err) => Err(err),
        };
        let latency_ms = elapsed_ms(started);

        match outcome {
            Ok(result) => {
                log::info!(
                    "{} answered with {} after {} attempt(s) [{}]",
                    kind.id(),
                    result.model,
                    tried.len() + 1,
                    correlation(request)
                );
                let attempt = succeeded(kind, &result, latency_ms);
                audit.emit(AuditRecord::from_attempt(request, attempt, Some(models.to_vec())));
                return Ok(result);
            }
            Err(err) => {
                let message = err.to_string();
                let attempt = failed(kind, Some(model.clone()), &message, latency_ms);
                audit.emit(AuditRecord::from_attempt(request, attempt, None));
                tried.push(ModelFailure {
                    model: model.clone(),
                    error: message,
                });

                match retry::decide(&err) {
                    RetryDecision::NextModel => {
                        log::debug!("{} model {model} failed, trying next: {err}", kind.id());
                    }
                    RetryDecision::AbortProvider | RetryDecision::NotApplicable => {
                        log::debug!("{} model {model} failed, giving up: {err}", kind.id());
                        break;
                    }
                }
            }
        }
    }

    Err(GatewayError::ModelsExhausted {
        provider: kind,
        attempts: tried,
    })
}

/// Exactly one call with one model; only a success is audited here.
pub async fn call_single(
    adapter: &dyn ProviderAdapter,
    request: &CompletionRequest,
    model: &str,
    config: &ProviderConfig,
    audit: &AuditEmitter,
) -> Result<CompletionResult, GatewayError> {
    let kind = adapter.kind();
    let api_key = require_key(kind, config)?;
    let started = Instant::now();
    let result = adapter.send(request, model, api_key).await?;
    let result = attach_json(kind, result, request.wants_json)?;
    let latency_ms = elapsed_ms(started);

    log::info!("{} answered with {} [{}]", kind.id(), result.model, correlation(request));
    audit.emit(AuditRecord::from_attempt(
        request,
        succeeded(kind, &result, latency_ms),
        None,
    ));
    Ok(result)
}

fn require_key(kind: ProviderKind, config: &ProviderConfig) -> Result<&str, GatewayError> {
    config
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or(GatewayError::ConfigMissing { provider: kind })
}

fn attach_json(
    kind: ProviderKind,
    mut result: CompletionResult,
    wants_json: bool,
) -> Result<CompletionResult, GatewayError> {
    if wants_json {
        let parsed =
            extract_json(&result.text).map_err(|err| GatewayError::malformed(kind, err.reason()))?;
        result.json = Some(parsed);
    }
    Ok(result)
}

fn succeeded(kind: ProviderKind, result: &CompletionResult, latency_ms: u64) -> ProviderAttempt {
    ProviderAttempt {
        provider: kind.id().to_string(),
        model: Some(result.model.clone()),
        success: true,
        latency_ms,
        error_message: None,
    }
}

pub(crate) fn failed(
    kind: ProviderKind,
    model: Option<String>,
    message: &str,
    latency_ms: u64,
) -> ProviderAttempt {
    ProviderAttempt {
        provider: kind.id().to_string(),
        model,
        success: false,
        latency_ms,
        error_message: Some(message.to_string()),
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn correlation(request: &CompletionRequest) -> &str {
    request.correlation_id.as_deref().unwrap_or("-")
}

/// Send a prepared request and return the decoded JSON body, mapping every
/// failure onto the typed taxonomy.
async fn send_json(kind: ProviderKind, builder: RequestBuilder) -> Result<Value, GatewayError> {
    let response = builder
        .send()
        .await
        .map_err(|err| GatewayError::transport(kind, err))?;
    let status = response.status();
    let raw = response
        .text()
        .await
        .map_err(|err| GatewayError::transport(kind, err))?;
    if !status.is_success() {
        return Err(GatewayError::from_status(kind, status.as_u16(), &raw));
    }
    serde_json::from_str(&raw)
        .map_err(|err| GatewayError::malformed(kind, format!("unparsable response body: {err}")))
}

fn usage_from(body: &Value, field: &str) -> Option<Value> {
    body.get(field).filter(|v| !v.is_null()).cloned()
}

/// Echoed model id when the upstream reports one.
fn echoed_model(body: &Value, requested: &str) -> String {
    body.get("model")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(requested)
        .to_string()
}

/// System text with the JSON-only instruction appended when needed.
fn system_with_json_hint(request: &CompletionRequest) -> Option<String> {
    let system = request.system_prompt().map(str::trim).unwrap_or_default();
    let text = if request.wants_json {
        format!("{system}\n\n{JSON_ONLY_INSTRUCTION}")
    } else {
        system.to_string()
    };
    let text = text.trim().to_string();
    (!text.is_empty()).then_some(text)
}
