//! Failover entry point that satisfies one completion request by walking the
//! providers in fixed priority order.
//!
//! Attempts are strictly sequential: at most one upstream call is in flight
//! per request, and no delay is inserted between attempts. A failed provider
//! is audited and recorded, then the next one is tried; only when every
//! provider has failed does the caller see an error.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;
use uuid::Uuid;

use crate::agents::cache::{Clock, ConfigCache, KeySource, SystemClock};
use crate::agents::config::{ConfigStore, ProviderKind, SqliteConfigStore};
use crate::agents::policy::{ModelPolicy, ModelResolver};
use crate::agents::providers::{
    call_candidates, call_single, default_adapters, elapsed_ms, failed, ProviderAdapter,
};
use crate::agents::request::{CompletionRequest, CompletionResult};
use crate::audit::{AuditEmitter, AuditRecord, AuditSink, NoopAuditSink, SqliteAuditSink};
use crate::db::DbPool;
use crate::errors::{GatewayError, ProviderFailure};
use crate::settings::GatewaySettings;

/// Whether a provider currently has a usable key, and from where.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub provider: ProviderKind,
    pub connected: bool,
    pub connected_via: KeySource,
}

pub struct AiGateway {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    cache: ConfigCache,
    resolver: ModelResolver,
    audit: AuditEmitter,
    settings: Arc<GatewaySettings>,
}

impl AiGateway {
    pub fn builder(settings: GatewaySettings, store: Arc<dyn ConfigStore>) -> AiGatewayBuilder {
        AiGatewayBuilder {
            settings,
            store,
            adapters: None,
            clock: Arc::new(SystemClock),
            sink: Arc::new(NoopAuditSink),
            policy: ModelPolicy::builtin(),
        }
    }

    /// Production wiring: SQLite store and audit sink, real HTTP adapters.
    pub fn from_pool(pool: DbPool, settings: GatewaySettings) -> Result<Arc<Self>> {
        let gateway = Self::builder(settings, Arc::new(SqliteConfigStore::new(pool.clone())))
            .audit_sink(Arc::new(SqliteAuditSink::new(pool)))
            .build()?;
        Ok(Arc::new(gateway))
    }

    /// Produce exactly one result, or `AllProvidersExhausted` carrying every
    /// provider's failure.
    pub async fn complete(
        &self,
        mut request: CompletionRequest,
    ) -> Result<CompletionResult, GatewayError> {
        let correlation_id = request
            .correlation_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        log::debug!(
            "completion [{correlation_id}] task={} json={}",
            request.task,
            request.wants_json
        );

        let mut failures = Vec::new();
        for adapter in &self.adapters {
            let kind = adapter.kind();
            let started = Instant::now();
            match self.attempt(adapter.as_ref(), &request).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    let message = err.to_string();
                    log::warn!("{} abandoned [{correlation_id}]: {message}", kind.id());
                    let attempt = failed(kind, None, &message, elapsed_ms(started));
                    self.audit.emit(AuditRecord::from_attempt(
                        &request,
                        attempt,
                        err.models_attempted(),
                    ));
                    failures.push(ProviderFailure {
                        provider: kind,
                        error: message,
                    });
                }
            }
        }

        let err = GatewayError::AllProvidersExhausted { failures };
        log::error!("[{correlation_id}] {err}");
        Err(err)
    }

    async fn attempt(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, GatewayError> {
        let kind = adapter.kind();
        let cached = self.cache.get_provider_config(kind).await;

        if adapter.multi_model() {
            let models = self.resolver.resolve_models(request.task, &cached.config);
            log::debug!("{} candidates: {:?}", kind.id(), models.as_slice());
            call_candidates(adapter, request, &models, &cached.config, &self.audit).await
        } else {
            let model = self
                .settings
                .model(kind)
                .unwrap_or_else(|| adapter.default_model().to_string());
            call_single(adapter, request, &model, &cached.config, &self.audit).await
        }
    }

    /// Wait for audit writes still in flight. Call before the process exits.
    pub async fn flush_audit(&self) {
        self.audit.flush().await;
    }

    /// Key availability per provider, in failover order.
    pub async fn provider_status(&self) -> Vec<ProviderStatus> {
        let mut statuses = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let kind = adapter.kind();
            let cached = self.cache.get_provider_config(kind).await;
            statuses.push(ProviderStatus {
                provider: kind,
                connected: cached.config.has_api_key(),
                connected_via: cached.key_source,
            });
        }
        statuses
    }
}

pub struct AiGatewayBuilder {
    settings: GatewaySettings,
    store: Arc<dyn ConfigStore>,
    adapters: Option<Vec<Arc<dyn ProviderAdapter>>>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn AuditSink>,
    policy: ModelPolicy,
}

impl AiGatewayBuilder {
    /// Replace the default adapters. Order is failover priority.
    pub fn adapters(mut self, adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        self.adapters = Some(adapters);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Lowest-priority policy source, consulted when nothing else is set.
    pub fn builtin_policy(mut self, policy: ModelPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Result<AiGateway> {
        let adapters = match self.adapters {
            Some(adapters) => adapters,
            None => default_adapters(&self.settings)?,
        };
        let resolver = ModelResolver::new(
            self.settings.model(ProviderKind::OpenRouter),
            self.settings.model_policy_json.as_deref(),
            self.policy,
        );
        let settings = Arc::new(self.settings);
        Ok(AiGateway {
            adapters,
            cache: ConfigCache::new(self.store, self.clock, Arc::clone(&settings)),
            resolver,
            audit: AuditEmitter::new(self.sink),
            settings,
        })
    }
}
