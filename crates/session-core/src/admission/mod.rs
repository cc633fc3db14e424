// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multi-tenant admission: resolves the tenant for an
//! inbound connection, binds it to the handling task, and gates
//! quota-bearing operations behind [`UsageTracker`]/[`RateLimiter`].

pub mod context;
pub mod rate_limiter;
pub mod repository;
pub mod resolver;
pub mod tenant;
pub mod usage;

use std::sync::Arc;

use crate::config::AdmissionConfig;
use crate::error::Result;
use crate::ids::{ConnectionId, TenantId};

pub use context::TenantContext;
pub use rate_limiter::RateLimiter;
pub use repository::{InMemoryTenantRepository, TenantRepository};
pub use resolver::{ResolutionContext, ResolutionStrategy, TenantResolver};
pub use tenant::{PlanTier, Tenant, TenantLimits, TenantStatus};
pub use usage::{InMemoryUsageStorage, LimitEnforcer, UsageMetric, UsageStorage, UsageTracker};

/// Ties tenant resolution, usage tracking, and rate limiting together
/// behind one entry point for `dispatch.rs`.
pub struct AdmissionLayer {
    pub resolver: TenantResolver,
    pub usage: Arc<UsageTracker>,
    pub limits: LimitEnforcer,
    pub rate_limiter: RateLimiter,
}

impl AdmissionLayer {
    pub fn new(
        repository: Arc<dyn TenantRepository>,
        usage_storage: Arc<dyn UsageStorage>,
        admission_config: AdmissionConfig,
        rate_limiter_config: crate::config::RateLimiterConfig,
        strategies: Vec<ResolutionStrategy>,
    ) -> Self {
        let usage = Arc::new(UsageTracker::new(usage_storage));
        Self {
            resolver: TenantResolver::new(repository, admission_config, strategies),
            limits: LimitEnforcer::new(usage.clone()),
            usage,
            rate_limiter: RateLimiter::new(rate_limiter_config),
        }
    }

    /// Admits a connection: resolves the tenant, checks it is usable, and
    /// binds a [`TenantContext`] the caller should run the connection's
    /// handling future inside via [`TenantContext::scope`].
    pub async fn admit(&self, connection_id: ConnectionId, ctx: &ResolutionContext<'_>) -> Result<TenantContext> {
        let tenant = self.resolver.resolve(ctx).await?;
        Ok(TenantContext::new(connection_id, tenant))
    }

    pub async fn enforce_usage(&self, tenant_id: &TenantId, limits: &TenantLimits, metric: UsageMetric, now_ms: i64) -> Result<()> {
        self.limits.enforce_and_increment(tenant_id, metric, limits, now_ms, 1).await?;
        Ok(())
    }

    pub fn enforce_rate(&self, tenant_id: &TenantId, plan: PlanTier, tenant_limit: i64, sub_key: Option<&str>, now_ms: i64) -> Result<()> {
        self.rate_limiter.enforce(tenant_id, plan, tenant_limit, sub_key, now_ms).map(|_| ())
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
