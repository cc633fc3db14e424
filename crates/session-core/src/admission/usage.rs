// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-tenant, per-metric, per-period usage counters. Storage
//! is abstracted behind [`UsageStorage`] so the in-process, `DashMap`-backed
//! implementation here can be swapped for a shared store without touching
//! [`LimitEnforcer`].

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::ids::TenantId;

use super::tenant::TenantLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UsageMetric {
    Users,
    StorageMb,
    ApiCalls,
}

impl UsageMetric {
    fn limit(self, limits: &TenantLimits) -> i64 {
        match self {
            Self::Users => limits.max_users,
            Self::StorageMb => limits.max_storage_mb,
            Self::ApiCalls => limits.max_api_calls_per_month,
        }
    }

    fn period(self) -> UsagePeriod {
        UsagePeriod::Monthly
    }
}

impl fmt::Display for UsageMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Users => "users",
            Self::StorageMb => "storage_mb",
            Self::ApiCalls => "api_calls",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UsagePeriod {
    Monthly,
}

impl UsagePeriod {
    fn key(self, now_ms: i64) -> String {
        let dt = chrono::DateTime::<Utc>::from_timestamp_millis(now_ms).unwrap_or_default();
        match self {
            Self::Monthly => dt.format("%Y-%m").to_string(),
        }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct UsageKey {
    pub tenant_id: TenantId,
    pub metric: UsageMetric,
    pub period: String,
}

/// Storage contract for usage counters. Implementations must make
/// `increment` linearizable under concurrent callers.
#[async_trait]
pub trait UsageStorage: Send + Sync {
    async fn get(&self, key: &UsageKey) -> i64;
    async fn set(&self, key: &UsageKey, value: i64);
    async fn increment(&self, key: &UsageKey, by: i64) -> i64;
    async fn get_all(&self, tenant_id: &TenantId) -> Vec<(UsageKey, i64)>;
    async fn reset(&self, key: &UsageKey);
}

#[derive(Default)]
pub struct InMemoryUsageStorage {
    counters: DashMap<UsageKey, AtomicI64>,
}

impl InMemoryUsageStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStorage for InMemoryUsageStorage {
    async fn get(&self, key: &UsageKey) -> i64 {
        self.counters.get(key).map(|c| c.load(Ordering::SeqCst)).unwrap_or(0)
    }

    async fn set(&self, key: &UsageKey, value: i64) {
        self.counters.entry(key.clone()).or_insert_with(|| AtomicI64::new(0)).store(value, Ordering::SeqCst);
    }

    async fn increment(&self, key: &UsageKey, by: i64) -> i64 {
        self.counters.entry(key.clone()).or_insert_with(|| AtomicI64::new(0)).fetch_add(by, Ordering::SeqCst) + by
    }

    async fn get_all(&self, tenant_id: &TenantId) -> Vec<(UsageKey, i64)> {
        self.counters
            .iter()
            .filter(|entry| &entry.key().tenant_id == tenant_id)
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::SeqCst)))
            .collect()
    }

    async fn reset(&self, key: &UsageKey) {
        self.counters.remove(key);
    }
}

/// One metric's usage relative to its plan limit, as returned by
/// [`UsageTracker::get_usage`] and [`LimitEnforcer::check`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub metric: UsageMetric,
    pub current: i64,
    pub limit: i64,
    pub percentage: f64,
}

fn percentage_of(current: i64, limit: i64) -> f64 {
    if limit < 0 {
        0.0
    } else if limit == 0 {
        100.0
    } else {
        (current as f64 / limit as f64) * 100.0
    }
}

/// Callback invoked exactly once per threshold crossing per period.
pub type ThresholdCallback = Arc<dyn Fn(&TenantId, UsageMetric, u8) + Send + Sync>;

pub struct UsageTracker {
    storage: Arc<dyn UsageStorage>,
    alert_thresholds: Vec<u8>,
    last_bucket: DashMap<UsageKey, u8>,
    on_threshold_reached: Option<ThresholdCallback>,
}

impl UsageTracker {
    pub fn new(storage: Arc<dyn UsageStorage>) -> Self {
        Self { storage, alert_thresholds: vec![80, 90, 100], last_bucket: DashMap::new(), on_threshold_reached: None }
    }

    pub fn with_alert_thresholds(mut self, thresholds: Vec<u8>) -> Self {
        self.alert_thresholds = thresholds;
        self
    }

    pub fn with_threshold_callback(mut self, callback: ThresholdCallback) -> Self {
        self.on_threshold_reached = Some(callback);
        self
    }

    fn key_for(tenant_id: &TenantId, metric: UsageMetric, now_ms: i64) -> UsageKey {
        UsageKey { tenant_id: tenant_id.clone(), metric, period: metric.period().key(now_ms) }
    }

    pub async fn get(&self, tenant_id: &TenantId, metric: UsageMetric, now_ms: i64) -> i64 {
        self.storage.get(&Self::key_for(tenant_id, metric, now_ms)).await
    }

    pub async fn set(&self, tenant_id: &TenantId, metric: UsageMetric, value: i64, now_ms: i64) {
        self.storage.set(&Self::key_for(tenant_id, metric, now_ms), value).await;
    }

    pub async fn reset(&self, tenant_id: &TenantId, metric: UsageMetric, now_ms: i64) {
        let key = Self::key_for(tenant_id, metric, now_ms);
        self.storage.reset(&key).await;
        self.last_bucket.remove(&key);
    }

    /// Increments the counter and fires `on_threshold_reached` once per
    /// newly-crossed alert threshold in this period.
    pub async fn increment(
        &self,
        tenant_id: &TenantId,
        metric: UsageMetric,
        by: i64,
        limits: &TenantLimits,
        now_ms: i64,
    ) -> i64 {
        let key = Self::key_for(tenant_id, metric, now_ms);
        let current = self.storage.increment(&key, by).await;
        let limit = metric.limit(limits);
        let percentage = percentage_of(current, limit);

        if limit >= 0 {
            let highest_crossed = self.alert_thresholds.iter().filter(|t| percentage >= **t as f64).max().copied();
            if let Some(threshold) = highest_crossed {
                let previous = self.last_bucket.insert(key.clone(), threshold);
                if previous != Some(threshold) {
                    if let Some(callback) = &self.on_threshold_reached {
                        callback(tenant_id, metric, threshold);
                    }
                }
            }
        }
        current
    }

    pub fn check_limit(&self, current: i64, limits: &TenantLimits, metric: UsageMetric) -> bool {
        let limit = metric.limit(limits);
        limit < 0 || current < limit
    }

    pub async fn get_usage(&self, tenant_id: &TenantId) -> Vec<(UsageKey, i64)> {
        self.storage.get_all(tenant_id).await
    }
}

/// Composes [`UsageTracker`] with a tenant's plan limits into an
/// allow/deny decision.
pub struct LimitEnforcer {
    tracker: Arc<UsageTracker>,
}

impl LimitEnforcer {
    pub fn new(tracker: Arc<UsageTracker>) -> Self {
        Self { tracker }
    }

    pub async fn check(
        &self,
        tenant_id: &TenantId,
        metric: UsageMetric,
        limits: &TenantLimits,
        now_ms: i64,
    ) -> UsageSnapshot {
        let current = self.tracker.get(tenant_id, metric, now_ms).await;
        let limit = metric.limit(limits);
        UsageSnapshot { metric, current, limit, percentage: percentage_of(current, limit) }
    }

    pub async fn enforce(
        &self,
        tenant_id: &TenantId,
        metric: UsageMetric,
        limits: &TenantLimits,
        now_ms: i64,
    ) -> crate::error::Result<UsageSnapshot> {
        let snapshot = self.check(tenant_id, metric, limits, now_ms).await;
        if snapshot.limit >= 0 && snapshot.current >= snapshot.limit {
            return Err(crate::error::CoreError::LimitExceeded);
        }
        Ok(snapshot)
    }

    pub async fn enforce_and_increment(
        &self,
        tenant_id: &TenantId,
        metric: UsageMetric,
        limits: &TenantLimits,
        now_ms: i64,
        by: i64,
    ) -> crate::error::Result<UsageSnapshot> {
        self.enforce(tenant_id, metric, limits, now_ms).await?;
        let current = self.tracker.increment(tenant_id, metric, by, limits, now_ms).await;
        let limit = metric.limit(limits);
        if limit >= 0 && current > limit {
            return Err(crate::error::CoreError::QuotaExceeded);
        }
        Ok(UsageSnapshot { metric, current, limit, percentage: percentage_of(current, limit) })
    }
}

#[cfg(test)]
#[path = "usage_tests.rs"]
mod tests;
