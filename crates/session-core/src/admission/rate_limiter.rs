// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tumbling-window rate limiting keyed on `(tenant, optional sub-key)`
//!. Bounded the same way as the tenant resolution cache
//! (`resolver.rs`): an `IndexMap` behind a `Mutex`, LRU-evicted once
//! `max_entries` is reached, so an attacker can't grow unbounded memory by
//! cycling sub-keys.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use indexmap::IndexMap;

use crate::config::RateLimiterConfig;
use crate::error::CoreError;
use crate::ids::TenantId;

use super::tenant::PlanTier;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct RateKey {
    tenant_id: TenantId,
    sub_key: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: i64,
    reset_at_ms: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: i64,
    pub remaining: i64,
    pub reset_at_ms: i64,
    pub retry_after: Option<Duration>,
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    limits_per_plan: HashMap<PlanTier, i64>,
    windows: Mutex<IndexMap<RateKey, RateWindow>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self { config, limits_per_plan: HashMap::new(), windows: Mutex::new(IndexMap::new()) }
    }

    pub fn with_plan_limit(mut self, plan: PlanTier, limit: i64) -> Self {
        self.limits_per_plan.insert(plan, limit);
        self
    }

    fn limit_for(&self, plan: PlanTier) -> i64 {
        self.limits_per_plan.get(&plan).copied().unwrap_or(self.config.default_limit)
    }

    /// `now_ms` is caller-supplied so tests can drive the tumbling window
    /// without real timers. `tenant_limit` overrides the plan default when
    /// non-negative (a tenant's `maxBehaviorsPerMinute`); pass `-1` to fall
    /// back to the plan's configured limit.
    pub fn is_allowed(&self, tenant_id: &TenantId, plan: PlanTier, tenant_limit: i64, sub_key: Option<&str>, now_ms: i64) -> RateDecision {
        let limit = if tenant_limit >= 0 { tenant_limit } else { self.limit_for(plan) };
        let key = RateKey { tenant_id: tenant_id.clone(), sub_key: sub_key.map(str::to_owned) };
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());

        if windows.len() >= self.config.max_entries && !windows.contains_key(&key) {
            windows.shift_remove_index(0);
        }

        let window = windows.entry(key.clone()).or_insert(RateWindow { count: 0, reset_at_ms: now_ms + self.config.window_ms as i64 });

        if now_ms > window.reset_at_ms {
            window.count = 0;
            window.reset_at_ms = now_ms + self.config.window_ms as i64;
        }

        if limit >= 0 && window.count >= limit {
            let retry_after = Duration::from_millis((window.reset_at_ms - now_ms).max(0) as u64);
            let decision = RateDecision { allowed: false, limit, remaining: 0, reset_at_ms: window.reset_at_ms, retry_after: Some(retry_after) };
            if let Some(index) = windows.get_index_of(&key) {
                let last = windows.len().saturating_sub(1);
                windows.move_index(index, last);
            }
            return decision;
        }

        window.count += 1;
        let remaining = if limit < 0 { i64::MAX } else { (limit - window.count).max(0) };
        let reset_at_ms = window.reset_at_ms;

        if let Some(index) = windows.get_index_of(&key) {
            let last = windows.len().saturating_sub(1);
            windows.move_index(index, last);
        }

        RateDecision { allowed: true, limit, remaining, reset_at_ms, retry_after: None }
    }

    pub fn enforce(&self, tenant_id: &TenantId, plan: PlanTier, tenant_limit: i64, sub_key: Option<&str>, now_ms: i64) -> Result<RateDecision, CoreError> {
        let decision = self.is_allowed(tenant_id, plan, tenant_limit, sub_key, now_ms);
        if decision.allowed {
            Ok(decision)
        } else {
            Err(CoreError::RateLimitExceeded)
        }
    }

    pub fn reset(&self, tenant_id: &TenantId, sub_key: Option<&str>) {
        let key = RateKey { tenant_id: tenant_id.clone(), sub_key: sub_key.map(str::to_owned) };
        self.windows.lock().unwrap_or_else(|p| p.into_inner()).shift_remove(&key);
    }

    pub fn cleanup(&self, now_ms: i64) {
        self.windows.lock().unwrap_or_else(|p| p.into_inner()).retain(|_, window| window.reset_at_ms > now_ms);
    }
}

#[cfg(test)]
#[path = "rate_limiter_tests.rs"]
mod tests;
