use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{echoed_model, send_json, system_with_json_hint, usage_from, ProviderAdapter};
use crate::agents::config::ProviderKind;
use crate::agents::request::{CompletionRequest, CompletionResult};
use crate::errors::GatewayError;

const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct ClaudeAdapter {
    client: Client,
    base_url: String,
}

impl ClaudeAdapter {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for ClaudeAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        model: &str,
        api_key: &str,
    ) -> Result<CompletionResult, GatewayError> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let builder = self
            .client
            .post(url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&messages_body(request, model));
        let body = send_json(self.kind(), builder).await?;

        let text = body
            .get("content")
            .and_then(|c| c.get(0))
            .and_then(|part| part.get("text"))
            .and_then(|text| text.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(CompletionResult {
            provider: self.kind().id().to_string(),
            model: echoed_model(&body, model),
            text,
            json: None,
            usage: usage_from(&body, "usage"),
        })
    }
}

// The conversation goes up as one user turn; the system text travels separately.
fn messages_body(request: &CompletionRequest, model: &str) -> Value {
    let mut payload = json!({
        "model": model,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "messages": [
            { "role": "user", "content": request.conversation_prompt() }
        ],
    });
    if let Some(system) = system_with_json_hint(request) {
        payload["system"] = Value::String(system);
    }
    payload
}
