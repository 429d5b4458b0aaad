use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{echoed_model, send_json, usage_from, ProviderAdapter};
use crate::agents::config::ProviderKind;
use crate::agents::request::{CompletionRequest, CompletionResult};
use crate::errors::GatewayError;

const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiAdapter {
    client: Client,
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
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
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let builder = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(&chat_completions_body(request, model));
        let body = send_json(self.kind(), builder).await?;
        Ok(parse_chat_completion(self.kind(), model, &body))
    }
}

/// OpenAI-style `chat/completions` payload, also spoken by OpenRouter.
pub(super) fn chat_completions_body(request: &CompletionRequest, model: &str) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect();
    let mut payload = json!({
        "model": model,
        "messages": messages,
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
    });
    if request.wants_json {
        payload["response_format"] = json!({ "type": "json_object" });
    }
    payload
}

pub(super) fn parse_chat_completion(
    kind: ProviderKind,
    requested_model: &str,
    body: &Value,
) -> CompletionResult {
    let text = body
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|val| val.as_str())
        .unwrap_or_default()
        .to_string();

    CompletionResult {
        provider: kind.id().to_string(),
        model: echoed_model(body, requested_model),
        text,
        json: None,
        usage: usage_from(body, "usage"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::request::{ChatMessage, TaskKey};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CompletionRequest {
        CompletionRequest::new(
            TaskKey::Copywriting,
            vec![ChatMessage::system("sys"), ChatMessage::user("write")],
        )
        .with_temperature(0.3)
        .with_max_tokens(64)
    }

    #[tokio::test]
    async fn posts_chat_completions_and_reads_the_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "max_tokens": 64,
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "write"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-4o-mini-2024-07-18",
                "choices": [{"message": {"role": "assistant", "content": "Done."}}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = OpenAiAdapter::new(Client::new(), server.uri());
        let result = adapter.send(&request(), "gpt-4o-mini", "sk-test").await.unwrap();

        assert_eq!(result.provider, "openai");
        assert_eq!(result.model, "gpt-4o-mini-2024-07-18");
        assert_eq!(result.text, "Done.");
        assert_eq!(result.usage.unwrap()["total_tokens"], 6);
    }

    #[tokio::test]
    async fn json_requests_ask_for_json_object_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"response_format": {"type": "json_object"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "{\"a\": 1}"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = OpenAiAdapter::new(Client::new(), server.uri());
        let result = adapter
            .send(&request().with_json(true), "gpt-4o-mini", "sk-test")
            .await
            .unwrap();
        assert_eq!(result.model, "gpt-4o-mini");
        assert_eq!(result.text, "{\"a\": 1}");
    }

    #[tokio::test]
    async fn error_statuses_become_typed_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("{\"error\":\"bad key\"}"))
            .mount(&server)
            .await;

        let adapter = OpenAiAdapter::new(Client::new(), server.uri());
        let err = adapter.send(&request(), "gpt-4o-mini", "nope").await.unwrap_err();
        assert!(matches!(err, GatewayError::Auth { status: 401, .. }));
        assert!(err.to_string().starts_with("OpenAI error (401):"));
    }

    #[tokio::test]
    async fn unparsable_success_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let adapter = OpenAiAdapter::new(Client::new(), server.uri());
        let err = adapter.send(&request(), "gpt-4o-mini", "sk").await.unwrap_err();
        assert!(matches!(err, GatewayError::MalformedResponse { .. }));
    }
}
