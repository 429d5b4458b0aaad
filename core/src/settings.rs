//! Environment-level configuration for the gateway.
//!
//! Everything is read once at start-up. Values here override what is
//! persisted in the store: API keys always win, model overrides pin a single
//! model, and the policy document sits between the persisted policy and the
//! built-in table.

use std::collections::HashMap;
use std::time::Duration;

use crate::agents::config::ProviderKind;

const DEFAULT_TIMEOUT_SECS: u64 = 45;
const DEFAULT_APP_URL: &str = "http://localhost";
const DEFAULT_APP_TITLE: &str = "AI Gateway";

/// Per-provider environment overrides.
#[derive(Debug, Clone, Default)]
struct ProviderOverrides {
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    providers: HashMap<ProviderKind, ProviderOverrides>,
    /// Raw JSON document for the multi-model provider's policy.
    pub model_policy_json: Option<String>,
    /// Sent as `HTTP-Referer` to the multi-model provider.
    pub app_url: String,
    /// Sent as `X-Title` to the multi-model provider.
    pub app_title: String,
    pub request_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            model_policy_json: None,
            app_url: DEFAULT_APP_URL.to_string(),
            app_title: DEFAULT_APP_TITLE.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl GatewaySettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from any variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let providers = ProviderKind::ALL
            .into_iter()
            .map(|kind| {
                let api_key = kind.api_key_vars().iter().find_map(|var| get(var));
                let overrides = ProviderOverrides {
                    api_key,
                    model: get(kind.model_var()),
                    base_url: get(kind.base_url_var()),
                };
                (kind, overrides)
            })
            .collect();

        let request_timeout = get("AI_GATEWAY_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));

        Self {
            providers,
            model_policy_json: get("OPENROUTER_MODEL_POLICY_JSON"),
            app_url: get("AI_GATEWAY_APP_URL").unwrap_or_else(|| DEFAULT_APP_URL.to_string()),
            app_title: get("AI_GATEWAY_APP_TITLE")
                .unwrap_or_else(|| DEFAULT_APP_TITLE.to_string()),
            request_timeout,
        }
    }

    pub fn api_key(&self, kind: ProviderKind) -> Option<String> {
        self.providers.get(&kind).and_then(|p| p.api_key.clone())
    }

    pub fn model(&self, kind: ProviderKind) -> Option<String> {
        self.providers.get(&kind).and_then(|p| p.model.clone())
    }

    pub fn base_url(&self, kind: ProviderKind) -> String {
        self.providers
            .get(&kind)
            .and_then(|p| p.base_url.clone())
            .unwrap_or_else(|| kind.default_base_url().to_string())
    }

    pub fn with_api_key(mut self, kind: ProviderKind, key: impl Into<String>) -> Self {
        self.providers.entry(kind).or_default().api_key = Some(key.into());
        self
    }

    pub fn with_model(mut self, kind: ProviderKind, model: impl Into<String>) -> Self {
        self.providers.entry(kind).or_default().model = Some(model.into());
        self
    }

    pub fn with_base_url(mut self, kind: ProviderKind, url: impl Into<String>) -> Self {
        self.providers.entry(kind).or_default().base_url = Some(url.into());
        self
    }

    pub fn with_model_policy_json(mut self, json: impl Into<String>) -> Self {
        self.model_policy_json = Some(json.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn reads_provider_overrides() {
        let settings = GatewaySettings::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "or-key"),
            ("OPENROUTER_MODEL", "x/model"),
            ("ANTHROPIC_BASE_URL", "http://127.0.0.1:9000"),
            ("AI_GATEWAY_TIMEOUT_SECS", "5"),
        ]));
        assert_eq!(settings.api_key(ProviderKind::OpenRouter).as_deref(), Some("or-key"));
        assert_eq!(settings.model(ProviderKind::OpenRouter).as_deref(), Some("x/model"));
        assert_eq!(settings.base_url(ProviderKind::Claude), "http://127.0.0.1:9000");
        assert_eq!(settings.base_url(ProviderKind::OpenAi), "https://api.openai.com");
        assert_eq!(settings.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn gemini_key_falls_back_to_cloud_key() {
        let settings =
            GatewaySettings::from_lookup(lookup(&[("GOOGLE_CLOUD_API_KEY", "cloud")]));
        assert_eq!(settings.api_key(ProviderKind::Gemini).as_deref(), Some("cloud"));

        let settings = GatewaySettings::from_lookup(lookup(&[
            ("GOOGLE_GEMINI_API_KEY", "gemini"),
            ("GOOGLE_CLOUD_API_KEY", "cloud"),
        ]));
        assert_eq!(settings.api_key(ProviderKind::Gemini).as_deref(), Some("gemini"));
    }

    #[test]
    fn blank_values_are_unset() {
        let settings = GatewaySettings::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "   "),
            ("AI_GATEWAY_TIMEOUT_SECS", "soon"),
        ]));
        assert!(settings.api_key(ProviderKind::OpenAi).is_none());
        assert_eq!(settings.request_timeout, Duration::from_secs(45));
        assert_eq!(settings.app_url, "http://localhost");
    }
}
