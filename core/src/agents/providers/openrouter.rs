use async_trait::async_trait;
use reqwest::Client;

use super::openai::{chat_completions_body, parse_chat_completion};
use super::{send_json, ProviderAdapter};
use crate::agents::config::ProviderKind;
use crate::agents::policy::SENTINEL_MODEL;
use crate::agents::request::{CompletionRequest, CompletionResult};
use crate::errors::GatewayError;
use crate::settings::GatewaySettings;

/// Multi-model router: one key, many upstream models.
pub struct OpenRouterAdapter {
    client: Client,
    base_url: String,
    app_url: String,
    app_title: String,
}

impl OpenRouterAdapter {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        app_url: impl Into<String>,
        app_title: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            app_url: app_url.into(),
            app_title: app_title.into(),
        }
    }

    pub fn from_settings(client: Client, settings: &GatewaySettings) -> Self {
        Self::new(
            client,
            settings.base_url(ProviderKind::OpenRouter),
            settings.app_url.clone(),
            settings.app_title.clone(),
        )
    }
}

#[async_trait]
impl ProviderAdapter for OpenRouterAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenRouter
    }

    fn default_model(&self) -> &str {
        SENTINEL_MODEL
    }

    fn multi_model(&self) -> bool {
        true
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        model: &str,
        api_key: &str,
    ) -> Result<CompletionResult, GatewayError> {
        let url = format!(
            "{}/api/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let builder = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .header("HTTP-Referer", &self.app_url)
            .header("X-Title", &self.app_title)
            .json(&chat_completions_body(request, model));
        let body = send_json(self.kind(), builder).await?;
        Ok(parse_chat_completion(self.kind(), model, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::config::ProviderConfig;
    use crate::agents::policy::ModelCandidateList;
    use crate::agents::providers::call_candidates;
    use crate::agents::request::{ChatMessage, TaskKey};
    use crate::audit::AuditEmitter;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> OpenRouterAdapter {
        OpenRouterAdapter::new(Client::new(), server.uri(), "https://app.example", "Gateway Tests")
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new(TaskKey::Sales, vec![ChatMessage::user("pitch it")])
    }

    fn keyed() -> ProviderConfig {
        ProviderConfig {
            api_key: Some("sk-or".into()),
            extra: None,
        }
    }

    #[tokio::test]
    async fn sends_attribution_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-or"))
            .and(header("HTTP-Referer", "https://app.example"))
            .and(header("X-Title", "Gateway Tests"))
            .and(body_partial_json(json!({"model": "openai/gpt-4o"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "openai/gpt-4o",
                "choices": [{"message": {"content": "Buy now"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = adapter(&server)
            .send(&request(), "openai/gpt-4o", "sk-or")
            .await
            .unwrap();
        assert_eq!(result.provider, "openrouter");
        assert_eq!(result.text, "Buy now");
    }

    #[tokio::test]
    async fn unauthorized_stops_after_one_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("No auth credentials found"))
            .expect(1)
            .mount(&server)
            .await;

        let models = ModelCandidateList::from_models(["m1", "m2", "m3"]);
        let err = call_candidates(
            &adapter(&server),
            &request(),
            &models,
            &keyed(),
            &AuditEmitter::disabled(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.models_attempted(), Some(vec!["m1".to_string()]));
    }

    #[tokio::test]
    async fn rate_limited_model_falls_through_to_the_next() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"model": "model-a"})))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"model": "model-b"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "from b"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let models = ModelCandidateList::from_models(["model-a", "model-b"]);
        let result = call_candidates(
            &adapter(&server),
            &request(),
            &models,
            &keyed(),
            &AuditEmitter::disabled(),
        )
        .await
        .unwrap();
        assert_eq!(result.model, "model-b");
        assert_eq!(result.text, "from b");
    }
}
