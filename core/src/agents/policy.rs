//! Candidate model resolution for the multi-model provider.
//!
//! Precedence, first match wins:
//! 1. the environment's single pinned model,
//! 2. the persisted single pinned model,
//! 3. a merged list built from the first available policy document
//!    (persisted `model_policy`, persisted `modelPolicy`, environment JSON,
//!    built-in table): the task's models, then `default`, then the sentinel.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use super::config::ProviderConfig;
use super::request::TaskKey;

/// Router-side automatic model choice; always the last resort.
pub const SENTINEL_MODEL: &str = "openrouter/auto";

const DEFAULT_KEY: &str = "default";

pub const BUILTIN_POLICY: &[(&str, &[&str])] = &[
    ("default", &[SENTINEL_MODEL]),
    ("general", &[SENTINEL_MODEL]),
    ("analysis", &["anthropic/claude-3.5-sonnet", SENTINEL_MODEL]),
    ("strategy", &["anthropic/claude-3.5-sonnet", SENTINEL_MODEL]),
    ("kanban_insights", &["anthropic/claude-3.5-sonnet", SENTINEL_MODEL]),
    ("hr", &["anthropic/claude-3.5-sonnet", SENTINEL_MODEL]),
    ("kanban_message", &["openai/gpt-4o", SENTINEL_MODEL]),
    ("copywriting", &["openai/gpt-4o", SENTINEL_MODEL]),
    ("sales", &["openai/gpt-4o", SENTINEL_MODEL]),
    ("sentiment", &["google/gemini-1.5-pro", SENTINEL_MODEL]),
    ("classification", &["google/gemini-1.5-pro", SENTINEL_MODEL]),
];

/// Mapping from policy key (task key or `default`) to ordered model ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelPolicy {
    entries: BTreeMap<String, Vec<String>>,
}

impl ModelPolicy {
    pub fn from_table(table: &[(&str, &[&str])]) -> Self {
        let entries = table
            .iter()
            .map(|(key, models)| {
                (
                    key.to_string(),
                    models.iter().map(|m| m.to_string()).collect(),
                )
            })
            .collect();
        Self { entries }
    }

    pub fn builtin() -> Self {
        Self::from_table(BUILTIN_POLICY)
    }

    /// Accepts a JSON object or a string holding one. Lists may be arrays or
    /// a bare string; blank ids are dropped. Empty documents yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(raw) => Self::parse(raw),
            Value::Object(map) => {
                let entries: BTreeMap<String, Vec<String>> = map
                    .iter()
                    .map(|(key, list)| (key.clone(), normalize_list(list)))
                    .filter(|(_, list)| !list.is_empty())
                    .collect();
                (!entries.is_empty()).then_some(Self { entries })
            }
            _ => None,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(raw).ok()?;
        match value {
            Value::Object(_) => Self::from_value(&value),
            _ => None,
        }
    }

    pub fn models_for(&self, key: &str) -> &[String] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn normalize_list(value: &Value) -> Vec<String> {
    let as_id = |v: &Value| match v {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    match value {
        Value::Array(items) => items.iter().map(as_id).filter(|s| !s.is_empty()).collect(),
        Value::String(_) => Some(as_id(value)).filter(|s| !s.is_empty()).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Ordered, de-duplicated, never-empty list of models to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCandidateList(Vec<String>);

impl ModelCandidateList {
    /// Keeps the first occurrence of each id; falls back to the sentinel when
    /// nothing usable remains.
    pub fn from_models<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for model in models {
            let id = model.as_ref().trim();
            if id.is_empty() || !seen.insert(id.to_string()) {
                continue;
            }
            out.push(id.to_string());
        }
        if out.is_empty() {
            out.push(SENTINEL_MODEL.to_string());
        }
        Self(out)
    }

    pub fn single(model: impl AsRef<str>) -> Self {
        Self::from_models([model])
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.clone()
    }
}

impl<'a> IntoIterator for &'a ModelCandidateList {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

pub struct ModelResolver {
    env_model: Option<String>,
    env_policy: Option<ModelPolicy>,
    builtin: ModelPolicy,
}

impl ModelResolver {
    pub fn new(env_model: Option<String>, env_policy_json: Option<&str>, builtin: ModelPolicy) -> Self {
        let env_policy = env_policy_json.and_then(|raw| {
            let parsed = ModelPolicy::parse(raw);
            if parsed.is_none() {
                log::warn!("ignoring unparsable model policy document from the environment");
            }
            parsed
        });
        Self {
            env_model: env_model.filter(|m| !m.trim().is_empty()),
            env_policy,
            builtin,
        }
    }

    pub fn resolve_models(&self, task: TaskKey, config: &ProviderConfig) -> ModelCandidateList {
        if let Some(model) = &self.env_model {
            return ModelCandidateList::single(model);
        }
        if let Some(model) = config.preferred_model() {
            return ModelCandidateList::single(model);
        }

        let persisted = config
            .policy_documents()
            .into_iter()
            .find_map(ModelPolicy::from_value);
        let policy = persisted
            .as_ref()
            .or(self.env_policy.as_ref())
            .unwrap_or(&self.builtin);

        let merged = policy
            .models_for(task.as_str())
            .iter()
            .chain(policy.models_for(DEFAULT_KEY))
            .map(String::as_str)
            .chain(std::iter::once(SENTINEL_MODEL));
        ModelCandidateList::from_models(merged)
    }
}
