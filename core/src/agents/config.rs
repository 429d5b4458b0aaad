use std::fmt;

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as B64_ENGINE;
use base64::Engine;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::db::DbPool;

/// Upstream completion services, listed in failover priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenRouter,
    Claude,
    OpenAi,
    Gemini,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenRouter,
        ProviderKind::Claude,
        ProviderKind::OpenAi,
        ProviderKind::Gemini,
    ];

    /// Stable id reported in results and audit records.
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Claude => "claude",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
        }
    }

    /// Key of the persisted `integration_configs` row.
    pub fn integration_id(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Claude => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "OpenRouter",
            ProviderKind::Claude => "Claude",
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Gemini => "Gemini",
        }
    }

    /// Accepts either the result id or the integration id.
    pub fn parse(value: &str) -> Option<Self> {
        let wanted = value.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.id() == wanted || kind.integration_id() == wanted)
    }

    /// Environment variables holding a raw API key, first match wins.
    pub fn api_key_vars(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::OpenRouter => &["OPENROUTER_API_KEY"],
            ProviderKind::Claude => &["ANTHROPIC_API_KEY"],
            ProviderKind::OpenAi => &["OPENAI_API_KEY"],
            ProviderKind::Gemini => &["GOOGLE_GEMINI_API_KEY", "GOOGLE_CLOUD_API_KEY"],
        }
    }

    pub fn model_var(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "OPENROUTER_MODEL",
            ProviderKind::Claude => "ANTHROPIC_MODEL",
            ProviderKind::OpenAi => "OPENAI_MODEL",
            ProviderKind::Gemini => "GEMINI_MODEL",
        }
    }

    pub fn base_url_var(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "OPENROUTER_BASE_URL",
            ProviderKind::Claude => "ANTHROPIC_BASE_URL",
            ProviderKind::OpenAi => "OPENAI_BASE_URL",
            ProviderKind::Gemini => "GEMINI_BASE_URL",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "https://openrouter.ai",
            ProviderKind::Claude => "https://api.anthropic.com",
            ProviderKind::OpenAi => "https://api.openai.com",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Credential and structured config for one provider, after merging the
/// environment over the persisted record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub extra: Option<Value>,
}

impl ProviderConfig {
    /// Single pinned model from the persisted config, if any.
    pub fn preferred_model(&self) -> Option<String> {
        self.extra
            .as_ref()
            .and_then(|extra| extra.get("model"))
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Persisted policy documents in lookup order: `model_policy`, then `modelPolicy`.
    pub fn policy_documents(&self) -> Vec<&Value> {
        let Some(extra) = self.extra.as_ref() else {
            return Vec::new();
        };
        ["model_policy", "modelPolicy"]
            .iter()
            .filter_map(|field| extra.get(*field))
            .filter(|v| !v.is_null())
            .collect()
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// Read side of the credential/config store.
pub trait ConfigStore: Send + Sync {
    /// `Ok(None)` when no record exists for the provider.
    fn load(&self, provider: ProviderKind) -> Result<Option<ProviderConfig>>;
}

/// `integration_configs` table behind an r2d2 pool.
#[derive(Clone)]
pub struct SqliteConfigStore {
    pool: DbPool,
}

impl SqliteConfigStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl ConfigStore for SqliteConfigStore {
    fn load(&self, provider: ProviderKind) -> Result<Option<ProviderConfig>> {
        let conn = self.pool.get()?;
        load_provider_config(&conn, provider)
    }
}

pub fn load_provider_config(
    conn: &rusqlite::Connection,
    provider: ProviderKind,
) -> Result<Option<ProviderConfig>> {
    let row: Option<(Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT api_key, config FROM integration_configs WHERE integration_id = ?1",
            params![provider.integration_id()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((secret, config)) = row else {
        return Ok(None);
    };

    let api_key = match secret {
        Some(s) if !s.is_empty() => Some(decode_secret(&s)?),
        _ => None,
    };
    let extra = match config {
        Some(raw) if !raw.trim().is_empty() => Some(
            serde_json::from_str::<Value>(&raw)
                .map_err(|err| anyhow!("Stored config for {} is not JSON: {err}", provider.id()))?,
        ),
        _ => None,
    };

    Ok(Some(ProviderConfig { api_key, extra }))
}

/// Upsert a provider's persisted record. A blank key clears the stored one;
/// `None` leaves it untouched.
pub fn save_provider_config(
    conn: &rusqlite::Connection,
    provider: ProviderKind,
    api_key: Option<&str>,
    extra: Option<&Value>,
) -> Result<()> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO integration_configs (integration_id, updated_at) VALUES (?1, ?2)
         ON CONFLICT(integration_id) DO UPDATE SET updated_at = excluded.updated_at",
        params![provider.integration_id(), now],
    )?;

    if let Some(key) = api_key {
        let trimmed = key.trim();
        let encoded = if trimmed.is_empty() {
            None
        } else {
            Some(B64_ENGINE.encode(trimmed.as_bytes()))
        };
        conn.execute(
            "UPDATE integration_configs SET api_key = ?1 WHERE integration_id = ?2",
            params![encoded, provider.integration_id()],
        )?;
    }

    if let Some(extra) = extra {
        conn.execute(
            "UPDATE integration_configs SET config = ?1 WHERE integration_id = ?2",
            params![extra.to_string(), provider.integration_id()],
        )?;
    }

    log::info!("updated stored config for {}", provider.id());
    Ok(())
}

fn decode_secret(encoded: &str) -> Result<String> {
    let decoded = B64_ENGINE
        .decode(encoded.as_bytes())
        .map_err(|_| anyhow!("Failed to decode stored credential"))?;
    String::from_utf8(decoded).map_err(|_| anyhow!("Stored credential was not valid UTF-8"))
}
