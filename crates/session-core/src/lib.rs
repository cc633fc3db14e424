// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Realtime session core: wire codec, heartbeat liveness, connection
//! registry, channel fan-out, presence tracking, and multi-tenant
//! admission for a raw-TCP realtime messaging server.

pub mod admission;
pub mod channel;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod heartbeat;
pub mod ids;
pub mod presence;
pub mod registry;
pub mod server;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::admission::{AdmissionLayer, InMemoryTenantRepository, InMemoryUsageStorage, ResolutionStrategy};
use crate::channel::ChannelRouter;
use crate::codec::Codec;
use crate::config::CoreConfig;
use crate::dispatch::SharedState;
use crate::heartbeat::HeartbeatManager;
use crate::presence::PresenceTracker;
use crate::registry::ConnectionRegistry;

/// Run the realtime core server until shutdown.
pub async fn run(config: CoreConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let repository: Arc<dyn admission::TenantRepository> = Arc::new(InMemoryTenantRepository::new());
    let usage_storage: Arc<dyn admission::UsageStorage> = Arc::new(InMemoryUsageStorage::new());
    let (heartbeat, evictions) = HeartbeatManager::new(config.heartbeat);

    let admission = AdmissionLayer::new(
        repository,
        usage_storage,
        config.admission.clone(),
        config.rate_limiter,
        vec![ResolutionStrategy::Header, ResolutionStrategy::Subdomain, ResolutionStrategy::Query],
    );

    let state = Arc::new(SharedState {
        codec: Arc::new(Codec::new(config.codec)),
        registry: Arc::new(ConnectionRegistry::new()),
        channels: Arc::new(ChannelRouter::new(config.channel)),
        presence: Arc::new(PresenceTracker::new(10_000)),
        heartbeat,
        admission: Arc::new(admission),
        config,
    });

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received shutdown signal");
            ctrl_c_shutdown.cancel();
        }
    });

    server::serve(state, evictions, shutdown).await
}
