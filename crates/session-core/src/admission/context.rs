// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task-scoped propagation of the resolved tenant for a connection. Every
//! future spawned from inside a [`TenantContext::scope`] call inherits the
//! same context; tasks outside it see nothing, so there is no global
//! mutable state to guard.

use std::future::Future;
use std::sync::Arc;

use crate::ids::{ConnectionId, TenantId};

use super::tenant::Tenant;

#[derive(Debug, Clone)]
pub struct TenantContext {
    pub connection_id: ConnectionId,
    pub tenant: Arc<Tenant>,
}

impl TenantContext {
    pub fn new(connection_id: ConnectionId, tenant: Arc<Tenant>) -> Self {
        Self { connection_id, tenant }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant.id
    }

    /// Runs `future` with `self` installed as the current task-local
    /// context. Anything spawned from within `future` inherits it.
    pub async fn scope<F>(self, future: F) -> F::Output
    where
        F: Future,
    {
        CURRENT.scope(self, future).await
    }

    /// Reads a clone of the context for the currently-executing task, if
    /// one is installed.
    pub fn current() -> Option<TenantContext> {
        CURRENT.try_with(|ctx| ctx.clone()).ok()
    }
}

tokio::task_local! {
    static CURRENT: TenantContext;
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
