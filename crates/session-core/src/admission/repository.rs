// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tenant lookup, abstracted behind [`TenantRepository`] so the in-memory
//! implementation here can later be swapped for one backed by an external
//! store without touching the resolver or dispatch code.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::ids::TenantId;

use super::tenant::{Tenant, TenantStatus};

/// Lookup contract for tenant records. A connection's handshake yields one
/// opaque identifier that may be either a tenant's `slug` or its `id`, so
/// callers resolve by trying `find_by_slug` first and falling back to
/// `find_by_id`.
#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn find_by_id(&self, tenant_id: &TenantId) -> Option<Tenant>;
    async fn find_by_slug(&self, slug: &str) -> Option<Tenant>;
}

#[derive(Default)]
pub struct InMemoryTenantRepository {
    tenants: DashMap<TenantId, Tenant>,
    by_slug: DashMap<String, TenantId>,
}

impl InMemoryTenantRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, tenant: Tenant) {
        self.by_slug.insert(tenant.slug.clone(), tenant.id.clone());
        self.tenants.insert(tenant.id.clone(), tenant);
    }

    pub fn remove(&self, tenant_id: &TenantId) {
        if let Some((_, tenant)) = self.tenants.remove(tenant_id) {
            self.by_slug.remove(&tenant.slug);
        }
    }

    /// Flips a tenant's status in place (`suspend(T)`).
    /// Returns `false` if the tenant is unknown.
    pub fn set_status(&self, tenant_id: &TenantId, status: TenantStatus) -> bool {
        match self.tenants.get_mut(tenant_id) {
            Some(mut entry) => {
                entry.status = status;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl TenantRepository for InMemoryTenantRepository {
    async fn find_by_id(&self, tenant_id: &TenantId) -> Option<Tenant> {
        self.tenants.get(tenant_id).map(|entry| entry.clone())
    }

    async fn find_by_slug(&self, slug: &str) -> Option<Tenant> {
        let id = self.by_slug.get(slug).map(|entry| entry.clone())?;
        self.tenants.get(&id).map(|entry| entry.clone())
    }
}

#[cfg(test)]
#[path = "repository_tests.rs"]
mod tests;
