// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tenant resolution: pulls a tenant id out of the connection's
//! handshake via one of several strategies, then looks it up through a
//! TTL-and-size-bounded cache in front of the [`TenantRepository`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::config::AdmissionConfig;
use crate::error::CoreError;
use crate::ids::TenantId;

use super::repository::TenantRepository;
use super::tenant::Tenant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    Subdomain,
    Header,
    Path,
    Query,
    Jwt,
    Custom,
}

static EMPTY_MAP: std::sync::LazyLock<HashMap<String, String>> = std::sync::LazyLock::new(HashMap::new);

/// Connection-handshake data available to the resolver. Unused fields are
/// `None`/empty depending on which strategies are configured.
#[derive(Debug)]
pub struct ResolutionContext<'a> {
    pub host: Option<&'a str>,
    pub headers: &'a HashMap<String, String>,
    pub path: &'a str,
    pub query: &'a HashMap<String, String>,
    pub jwt_claims: Option<&'a serde_json::Value>,
    pub custom_tenant_id: Option<&'a str>,
}

impl<'a> Default for ResolutionContext<'a> {
    fn default() -> Self {
        Self { host: None, headers: &EMPTY_MAP, path: "", query: &EMPTY_MAP, jwt_claims: None, custom_tenant_id: None }
    }
}

fn subdomain_of(host: &str) -> Option<&str> {
    let host = host.split(':').next().unwrap_or(host);
    let mut labels = host.split('.');
    let first = labels.next()?;
    if labels.count() >= 1 && first != "www" {
        Some(first)
    } else {
        None
    }
}

struct CacheEntry {
    tenant: Arc<Tenant>,
    expires_at: Instant,
}

struct TenantCache {
    entries: Mutex<IndexMap<TenantId, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl TenantCache {
    fn new(ttl: Duration, max_entries: usize) -> Self {
        Self { entries: Mutex::new(IndexMap::new()), ttl, max_entries: max_entries.max(1) }
    }

    fn get(&self, id: &TenantId) -> Option<Arc<Tenant>> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let live = match entries.get(id) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.tenant.clone()),
            Some(_) => None,
            None => return None,
        };
        let Some(tenant) = live else {
            entries.shift_remove(id);
            return None;
        };
        if let Some(index) = entries.get_index_of(id) {
            let last = entries.len().saturating_sub(1);
            entries.move_index(index, last);
        }
        Some(tenant)
    }

    fn insert(&self, id: TenantId, tenant: Arc<Tenant>) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if entries.len() >= self.max_entries && !entries.contains_key(&id) {
            entries.shift_remove_index(0);
        }
        entries.insert(id, CacheEntry { tenant, expires_at: Instant::now() + self.ttl });
    }

    fn invalidate(&self, id: &TenantId) {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).shift_remove(id);
    }
}

/// Resolves a [`Tenant`] from handshake context, trying each configured
/// strategy in order until one yields a candidate tenant id.
pub struct TenantResolver {
    repository: Arc<dyn TenantRepository>,
    config: AdmissionConfig,
    strategies: Vec<ResolutionStrategy>,
    cache: TenantCache,
}

impl TenantResolver {
    pub fn new(repository: Arc<dyn TenantRepository>, config: AdmissionConfig, strategies: Vec<ResolutionStrategy>) -> Self {
        let cache = TenantCache::new(config.cache_ttl(), config.cache_max_entries);
        Self { repository, config, strategies, cache }
    }

    fn candidate_id(&self, ctx: &ResolutionContext<'_>) -> Option<TenantId> {
        for strategy in &self.strategies {
            let found = match strategy {
                ResolutionStrategy::Subdomain => ctx.host.and_then(subdomain_of).map(TenantId::from),
                ResolutionStrategy::Header => ctx.headers.get(&self.config.tenant_header).map(|s| TenantId::from(s.as_str())),
                ResolutionStrategy::Path => ctx.path.split('/').find(|s| !s.is_empty()).map(TenantId::from),
                ResolutionStrategy::Query => {
                    ctx.query.get(&self.config.tenant_query_param).map(|s| TenantId::from(s.as_str()))
                }
                ResolutionStrategy::Jwt => ctx
                    .jwt_claims
                    .and_then(|claims| claims.get(&self.config.tenant_jwt_claim))
                    .and_then(|v| v.as_str())
                    .map(TenantId::from),
                ResolutionStrategy::Custom => ctx.custom_tenant_id.map(TenantId::from),
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }

    pub async fn resolve(&self, ctx: &ResolutionContext<'_>) -> Result<Arc<Tenant>, CoreError> {
        let tenant_id = self.candidate_id(ctx).ok_or(CoreError::TenantNotFound)?;

        if let Some(tenant) = self.cache.get(&tenant_id) {
            return Self::check_admissible(tenant);
        }

        let tenant = match self.repository.find_by_slug(&tenant_id.0).await {
            Some(tenant) => tenant,
            None => self.repository.find_by_id(&tenant_id).await.ok_or(CoreError::TenantNotFound)?,
        };
        let tenant = Arc::new(tenant);
        self.cache.insert(tenant_id, tenant.clone());
        Self::check_admissible(tenant)
    }

    pub fn invalidate(&self, tenant_id: &TenantId) {
        self.cache.invalidate(tenant_id);
    }

    fn check_admissible(tenant: Arc<Tenant>) -> Result<Arc<Tenant>, CoreError> {
        match tenant.status {
            super::tenant::TenantStatus::Active => Ok(tenant),
            super::tenant::TenantStatus::Suspended => Err(CoreError::TenantSuspended),
            super::tenant::TenantStatus::Deleted => Err(CoreError::TenantNotFound),
            super::tenant::TenantStatus::Pending => Err(CoreError::TenantAccessDenied),
        }
    }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
