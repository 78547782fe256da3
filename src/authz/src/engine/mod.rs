//! Authorization decision engine
//!
//! Orchestrates role aggregation, permission resolution and override application
//! behind a decision cache, and gates identity mutations through the safety checker.

pub mod audit;
pub mod cache;
pub mod decision;
pub mod metrics;

pub use audit::{AuditEvent, AuditLogger, AuditRecord, AuditSink, InMemoryAuditSink};
pub use cache::{CacheConfig, CacheStats, DecisionCache};
pub use decision::SafetyDecision;
pub use metrics::{EngineMetrics, MetricsCollector};

use crate::config::{EngineConfig, PolicyMode};
use crate::directory::RoleDirectory;
use crate::error::{AuthzError, Result};
use crate::mutation::IdentityMutation;
use crate::resolver::{apply_overrides, PermissionResolver, PermissionSource};
use crate::roles::RoleAggregator;
use crate::safety::{LockoutGuard, SafetyChecker};
use crate::store::PrincipalStore;
use crate::types::{NodeId, Permission, PermissionSet, PrincipalId};

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Main authorization engine
///
/// # Architecture
///
/// ```text
/// resolve ─→ [Cache] ─miss→ RoleAggregator → PermissionResolver → apply_overrides
///                ↑                                                      │
///                └──────────────── put (ticketed) ──────────────────────┘
///
/// mutate ─→ gate lock → has_permission → SafetyChecker → store.commit → invalidate → audit
/// ```
pub struct AuthzEngine {
    /// Role collection from the principal store
    aggregator: RoleAggregator,

    /// Role → permission resolution under the configured policy mode
    resolver: PermissionResolver,

    /// Escalation and lockout guardrails
    safety: SafetyChecker,

    /// Principal store (reads and guarded commits)
    store: Arc<dyn PrincipalStore>,

    /// Resolved permission sets per (principal, node)
    cache: DecisionCache,

    /// Serializes check-then-commit for identity mutations
    mutation_gate: Mutex<()>,

    /// Best-effort audit events
    audit: AuditLogger,

    /// Metrics collector
    metrics: Option<Arc<MetricsCollector>>,

    /// Engine configuration
    config: EngineConfig,
}

impl AuthzEngine {
    /// Create an engine that audits through `tracing`
    pub fn new(
        config: EngineConfig,
        directory: Arc<dyn RoleDirectory>,
        store: Arc<dyn PrincipalStore>,
    ) -> Self {
        Self::with_audit(config, directory, store, AuditLogger::tracing())
    }

    /// Create an engine with an explicit audit logger
    pub fn with_audit(
        config: EngineConfig,
        directory: Arc<dyn RoleDirectory>,
        store: Arc<dyn PrincipalStore>,
        audit: AuditLogger,
    ) -> Self {
        let aggregator = RoleAggregator::new(store.clone(), config.role_tiers.clone());
        let resolver = PermissionResolver::new(directory, config.policy_mode, audit.clone());
        let safety = SafetyChecker::new(
            config.role_tiers.clone(),
            LockoutGuard::new(config.required_roles.clone()),
        );
        let cache = DecisionCache::new(config.cache.clone());
        let metrics = config
            .enable_metrics
            .then(|| Arc::new(MetricsCollector::new()));

        info!(
            "AuthzEngine initialized with policy_mode={}, cache={} (ttl={:?}), required_roles={:?}",
            config.policy_mode, config.cache.enabled, config.cache.ttl, config.required_roles
        );

        Self {
            aggregator,
            resolver,
            safety,
            store,
            cache,
            mutation_gate: Mutex::new(()),
            audit,
            metrics,
            config,
        }
    }

    pub fn policy_mode(&self) -> PolicyMode {
        self.resolver.mode()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Effective permissions of `principal` in the `node` context.
    ///
    /// # Pipeline
    ///
    /// 1. Return the cached set if present and unexpired
    /// 2. Aggregate the principal's role assignments
    /// 3. Resolve applicable roles through the directory (policy mode on failure)
    /// 4. Apply node-matching overrides, denies last
    /// 5. Cache authoritative results only
    ///
    /// # Errors
    ///
    /// `PrincipalNotFound` for an unknown subject. Directory outages never surface.
    pub async fn resolve_permissions(
        &self,
        principal: &PrincipalId,
        node: Option<NodeId>,
    ) -> Result<PermissionSet> {
        let start = Instant::now();

        // Step 1: Check cache
        if let Some(cached) = self.cache.get(principal, node) {
            debug!("Cache hit for {} at {:?}", principal, node);
            if let Some(metrics) = &self.metrics {
                metrics.record_resolution(true).await;
            }
            return Ok(cached);
        }

        let ticket = self.cache.ticket(principal);

        // Step 2: Aggregate roles
        let aggregated = self.aggregator.aggregate(principal).await?;

        // Step 3: Base permissions
        let resolution = self
            .resolver
            .resolve(principal, &aggregated.roles, node)
            .await;

        // Step 4: Overrides (strict-mode outage fails closed for the whole principal)
        let permissions = match resolution.source {
            PermissionSource::Unavailable => PermissionSet::new(),
            _ => apply_overrides(resolution.permissions, &aggregated.overrides, node),
        };

        // Step 5: Cache, metrics
        if resolution.source.is_authoritative() {
            self.cache.put(principal, node, ticket, permissions.clone());
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_resolution(false).await;
            if !resolution.source.is_authoritative() {
                metrics
                    .record_directory_failure(resolution.source == PermissionSource::Fallback)
                    .await;
            }
            metrics.record_latency(start.elapsed()).await;
        }

        debug!(
            "Resolved {} permission(s) for {} at {:?} (source={:?})",
            permissions.len(),
            principal,
            node,
            resolution.source
        );

        Ok(permissions)
    }

    /// Whether `principal` holds `permission` in the `node` context.
    ///
    /// A malformed or unknown permission string is simply not held. Every refusal
    /// emits a `PermissionDenied` audit event.
    pub async fn has_permission(
        &self,
        principal: &PrincipalId,
        permission: &str,
        node: Option<NodeId>,
    ) -> Result<bool> {
        let permissions = self.resolve_permissions(principal, node).await?;
        let allowed = Permission::parse(permission)
            .map(|p| permissions.contains(&p))
            .unwrap_or(false);

        if !allowed {
            debug!("{} lacks {} at {:?}", principal, permission, node);
            if let Some(metrics) = &self.metrics {
                metrics.record_denied_check().await;
            }
            self.audit.log(AuditEvent::PermissionDenied {
                principal: principal.clone(),
                permission: permission.to_string(),
                node,
            });
        }

        Ok(allowed)
    }

    /// Run the safety guardrails for `acting` applying `mutation` to `target`.
    ///
    /// # Errors
    ///
    /// `PrincipalNotFound` when either principal is unknown.
    pub async fn check_safety(
        &self,
        acting: &PrincipalId,
        mutation: &IdentityMutation,
        target: &PrincipalId,
    ) -> Result<SafetyDecision> {
        let actor = self.aggregator.aggregate(acting).await?;
        let target_record = self
            .store
            .load(target)
            .await?
            .ok_or_else(|| AuthzError::PrincipalNotFound(target.to_string()))?;
        let actor_permissions = self.resolve_permissions(acting, mutation.node()).await?;

        let decision = self
            .safety
            .check(
                &actor,
                &actor_permissions,
                &target_record,
                mutation,
                self.store.as_ref(),
            )
            .await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_safety_check(decision.allowed).await;
        }

        if let Some(reason) = &decision.reason {
            warn!(
                "Safety check rejected {} by {} on {}: {}",
                mutation.kind(),
                acting,
                target,
                reason
            );
            self.audit.log(AuditEvent::SafetyRejected {
                actor: acting.clone(),
                target: target.clone(),
                action: mutation.kind().to_string(),
                reason: reason.clone(),
            });
        }

        Ok(decision)
    }

    /// Apply an identity mutation through the full gate.
    ///
    /// Order: generic permission check, safety check, guarded commit, cache
    /// invalidation, audit. Returns only after the target's cache entries are gone.
    ///
    /// # Errors
    ///
    /// - `PermissionDenied` when `acting` lacks the mutation's required permission
    /// - `SafetyViolation` with the guardrail reason
    /// - `PrincipalNotFound` for unknown principals
    pub async fn apply_mutation(
        &self,
        acting: &PrincipalId,
        mutation: IdentityMutation,
        target: &PrincipalId,
    ) -> Result<()> {
        let _gate = self.mutation_gate.lock().await;

        let required = mutation.required_permission();
        if !self.has_permission(acting, required, mutation.node()).await? {
            return Err(AuthzError::PermissionDenied(format!(
                "{} requires {}",
                mutation.kind(),
                required
            )));
        }

        let decision = self.check_safety(acting, &mutation, target).await?;
        if !decision.allowed {
            return Err(AuthzError::safety(
                decision.reason.unwrap_or_else(|| "rejected by safety check".to_string()),
            ));
        }

        if let Err(e) = self.store.commit(target, &mutation, self.safety.guard()).await {
            if let AuthzError::SafetyViolation { reason } = &e {
                self.audit.log(AuditEvent::SafetyRejected {
                    actor: acting.clone(),
                    target: target.clone(),
                    action: mutation.kind().to_string(),
                    reason: reason.clone(),
                });
            }
            return Err(e);
        }

        // Invalidate before acknowledging
        self.cache.invalidate(target);

        info!("{} applied {} to {}", acting, mutation.kind(), target);
        if let Some(metrics) = &self.metrics {
            metrics.record_mutation().await;
        }

        let event = match mutation {
            IdentityMutation::DeletePrincipal => AuditEvent::PrincipalDeleted {
                actor: acting.clone(),
                target: target.clone(),
            },
            m if m.changes_roles() => AuditEvent::RoleChanged {
                actor: acting.clone(),
                target: target.clone(),
                mutation: m,
            },
            m => AuditEvent::OverrideChanged {
                actor: acting.clone(),
                target: target.clone(),
                mutation: m,
            },
        };
        self.audit.log(event);

        Ok(())
    }

    /// Drop the cached sets of `principal`
    pub fn invalidate(&self, principal: &PrincipalId) {
        self.cache.invalidate(principal);
        debug!("Cache invalidated for {}", principal);
    }

    /// Drop every cached set (role definitions changed in the directory)
    pub fn invalidate_all(&self) {
        self.cache.clear();
        info!("Decision cache cleared");
    }

    /// Get engine metrics
    pub async fn metrics(&self) -> Option<EngineMetrics> {
        match &self.metrics {
            Some(metrics) => Some(metrics.get_metrics().await),
            None => None,
        }
    }

    /// Prometheus text export, empty when metrics are disabled
    pub async fn export_prometheus(&self) -> String {
        match &self.metrics {
            Some(metrics) => metrics.export_prometheus().await,
            None => String::new(),
        }
    }

    /// Get cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
