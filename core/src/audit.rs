//! Best-effort audit trail of provider attempts.
//!
//! Every attempt is written at most once and never retried. Sink failures are
//! logged at `debug` and dropped so they cannot change what the gateway
//! returns.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rusqlite::params;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::{spawn_blocking, JoinSet};
use uuid::Uuid;

use crate::agents::request::{CompletionRequest, TaskKey};
use crate::db::DbPool;

pub const ACTION_SUCCESS: &str = "ai.request";
pub const ACTION_FAILURE: &str = "ai.request_failed";
const DEFAULT_ENTITY_TYPE: &str = "ai";
const MAX_AUDIT_ERROR_CHARS: usize = 500;

/// Outcome of one provider (or one model) call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAttempt {
    pub provider: String,
    pub model: Option<String>,
    pub success: bool,
    pub latency_ms: u64,
    pub error_message: Option<String>,
}

/// Append-only fact persisted for each attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub correlation_id: String,
    pub provider: String,
    pub model: Option<String>,
    pub success: bool,
    pub latency_ms: u64,
    pub task: TaskKey,
    pub wants_json: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models_attempted: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub actor_id: Option<String>,
    #[serde(skip)]
    pub entity_type: Option<String>,
    #[serde(skip)]
    pub entity_id: Option<String>,
}

impl AuditRecord {
    pub fn from_attempt(
        request: &CompletionRequest,
        attempt: ProviderAttempt,
        models_attempted: Option<Vec<String>>,
    ) -> Self {
        Self {
            correlation_id: request.correlation_id.clone().unwrap_or_default(),
            provider: attempt.provider,
            model: attempt.model,
            success: attempt.success,
            latency_ms: attempt.latency_ms,
            task: request.task,
            wants_json: request.wants_json,
            models_attempted,
            error: attempt
                .error_message
                .map(|e| e.chars().take(MAX_AUDIT_ERROR_CHARS).collect()),
            actor_id: request.actor_id.clone(),
            entity_type: request.entity_type.clone(),
            entity_id: request.entity_id.clone(),
        }
    }

    pub fn action(&self) -> &'static str {
        if self.success {
            ACTION_SUCCESS
        } else {
            ACTION_FAILURE
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<()>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _record: AuditRecord) -> Result<()> {
        Ok(())
    }
}

/// Writes into the `audit_logs` table.
#[derive(Clone)]
pub struct SqliteAuditSink {
    pool: DbPool,
}

impl SqliteAuditSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        let pool = self.pool.clone();
        spawn_blocking(move || {
            let conn = pool.get()?;
            insert_audit_record(&conn, &record)
        })
        .await
        .map_err(|err| anyhow!(err.to_string()))?
    }
}

pub fn insert_audit_record(conn: &rusqlite::Connection, record: &AuditRecord) -> Result<()> {
    let id = Uuid::new_v4().to_string();
    let ts = OffsetDateTime::now_utc().unix_timestamp();
    let values = serde_json::to_string(record)?;
    conn.execute(
        "INSERT INTO audit_logs (id, user_id, action, entity_type, entity_id, new_values, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            record.actor_id,
            record.action(),
            record.entity_type.as_deref().unwrap_or(DEFAULT_ENTITY_TYPE),
            record.entity_id,
            values,
            ts,
        ],
    )?;
    Ok(())
}

/// Fire-and-forget front for an [`AuditSink`].
///
/// Each record is written on its own task, so a slow or failing sink never
/// holds up the request that produced it. Dropping the last clone aborts
/// writes still in flight; call [`AuditEmitter::flush`] before shutdown.
#[derive(Clone)]
pub struct AuditEmitter {
    sink: Arc<dyn AuditSink>,
    pending: Arc<Mutex<JoinSet<()>>>,
}

impl AuditEmitter {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            pending: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopAuditSink))
    }

    /// Hand a record to the sink and return immediately. Must be called from
    /// within a tokio runtime.
    pub fn emit(&self, record: AuditRecord) {
        let sink = Arc::clone(&self.sink);
        let write = async move {
            let action = record.action();
            let provider = record.provider.clone();
            if let Err(err) = sink.record(record).await {
                log::debug!("dropped {action} audit record for {provider}: {err:#}");
            }
        };
        match self.pending.lock() {
            Ok(mut pending) => {
                while pending.try_join_next().is_some() {}
                pending.spawn(write);
            }
            Err(_) => {
                tokio::spawn(write);
            }
        }
    }

    /// Wait for every write handed off so far.
    pub async fn flush(&self) {
        let mut pending = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return,
        };
        while pending.join_next().await.is_some() {}
    }
}
