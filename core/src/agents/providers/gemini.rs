use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{send_json, system_with_json_hint, usage_from, ProviderAdapter};
use crate::agents::config::ProviderKind;
use crate::agents::request::{CompletionRequest, CompletionResult};
use crate::errors::GatewayError;

const DEFAULT_MODEL: &str = "gemini-1.5-flash";

pub struct GeminiAdapter {
    client: Client,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
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
        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        );
        let builder = self
            .client
            .post(endpoint)
            .query(&[("key", api_key)])
            .json(&generate_body(request));
        let body = send_json(self.kind(), builder).await?;

        // Long answers may be split across several parts.
        let text = body
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|cand| cand.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(|parts| parts.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                    .collect::<String>()
            })
            .unwrap_or_default();

        Ok(CompletionResult {
            provider: self.kind().id().to_string(),
            model: model.to_string(),
            text,
            json: None,
            usage: usage_from(&body, "usageMetadata"),
        })
    }
}

fn generate_body(request: &CompletionRequest) -> Value {
    let conversation = request.conversation_prompt();
    let prompt = match system_with_json_hint(request) {
        Some(system) => format!("{system}\n\n{conversation}"),
        None => conversation,
    };
    json!({
        "contents": [
            { "role": "user", "parts": [{ "text": prompt }] }
        ],
        "generationConfig": {
            "temperature": request.temperature,
            "maxOutputTokens": request.max_tokens,
        }
    })
}
