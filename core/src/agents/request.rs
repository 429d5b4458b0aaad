use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Coarse intent of a caller, used only to pick a model list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKey {
    #[default]
    General,
    Analysis,
    Strategy,
    Sales,
    Copywriting,
    Hr,
    Sentiment,
    Classification,
    KanbanMessage,
    KanbanInsights,
}

impl TaskKey {
    pub const ALL: [TaskKey; 10] = [
        TaskKey::General,
        TaskKey::Analysis,
        TaskKey::Strategy,
        TaskKey::Sales,
        TaskKey::Copywriting,
        TaskKey::Hr,
        TaskKey::Sentiment,
        TaskKey::Classification,
        TaskKey::KanbanMessage,
        TaskKey::KanbanInsights,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKey::General => "general",
            TaskKey::Analysis => "analysis",
            TaskKey::Strategy => "strategy",
            TaskKey::Sales => "sales",
            TaskKey::Copywriting => "copywriting",
            TaskKey::Hr => "hr",
            TaskKey::Sentiment => "sentiment",
            TaskKey::Classification => "classification",
            TaskKey::KanbanMessage => "kanban_message",
            TaskKey::KanbanInsights => "kanban_insights",
        }
    }

    /// Lenient parse: anything unrecognised is treated as `general`.
    pub fn parse(value: &str) -> Self {
        let wanted = value.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|task| task.as_str() == wanted)
            .unwrap_or_default()
    }
}

impl FromStr for TaskKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A single logical "generate text/JSON for task T" request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    #[serde(default)]
    pub task: TaskKey,
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, alias = "json")]
    pub wants_json: bool,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

impl CompletionRequest {
    pub fn new(task: TaskKey, messages: Vec<ChatMessage>) -> Self {
        Self {
            task,
            messages,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            wants_json: false,
            actor_id: None,
            entity_type: None,
            entity_id: None,
            correlation_id: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_json(mut self, wants_json: bool) -> Self {
        self.wants_json = wants_json;
        self
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// The first system message, for providers that take instructions separately.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Non-system turns flattened into `ROLE: content` blocks.
    pub fn conversation_prompt(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.content.trim()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Normalised outcome returned by every provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResult {
    pub provider: String,
    pub model: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}
