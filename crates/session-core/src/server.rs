// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Accept loop: binds the listener, spawns one
//! [`crate::dispatch::handle_connection`] task per accepted socket, and runs
//! the heartbeat sweeper and presence cleanup sweeper alongside it until
//! `shutdown` fires.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatch::{handle_connection, SharedState};
use crate::ids::{ConnectionId, TenantId};
use crate::registry::ConnectionState;

/// Cadence and staleness threshold for the presence cleanup sweeper. Not
/// exposed via `CoreConfig` since, unlike heartbeat/codec tuning, no example
/// deployment has needed to change it independently of the heartbeat
/// timeout it tracks.
const PRESENCE_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
const PRESENCE_STALE_MS: u64 = 120_000;

/// Forwards heartbeat evictions into forced connection closes. Flips the
/// registry entry to `Closed` and cancels its per-connection token; the
/// connection's own `handle_connection` task observes the cancellation,
/// tears down its reader/writer pair, and performs the actual registry
/// removal and channel unsubscription, so this forwarder doesn't race it.
fn spawn_eviction_forwarder(state: Arc<SharedState>, mut evictions: mpsc::UnboundedReceiver<ConnectionId>) {
    tokio::spawn(async move {
        while let Some(connection_id) = evictions.recv().await {
            warn!(connection_id = %connection_id, "evicting stale connection");
            let _ = state.registry.transition(&connection_id, ConnectionState::Closed);
            state.registry.force_close(&connection_id);
        }
    });
}

/// Forces every open connection belonging to `tenant_id` through
/// `Open -> Draining` immediately, then `Draining -> Closed` once
/// `config.admission.suspend_grace()` has elapsed. While `Draining`,
/// `run_subscription_forwarder` stops handing the connection newly
/// published events but lets frames already queued drain to the socket
/// before the forced close lands.
pub async fn suspend_tenant(state: &Arc<SharedState>, tenant_id: &TenantId) {
    // Drop any cached resolution so the next handshake re-resolves against
    // the repository's updated status instead of serving a stale `Active`
    // entry for the remainder of the cache's TTL.
    state.admission.resolver.invalidate(tenant_id);

    let connection_ids = state.registry.connections_for_tenant(tenant_id);
    if connection_ids.is_empty() {
        return;
    }
    info!(tenant_id = %tenant_id, connections = connection_ids.len(), "draining tenant connections for suspension");
    for connection_id in &connection_ids {
        let _ = state.registry.transition(connection_id, ConnectionState::Draining);
    }

    let grace = state.config.admission.suspend_grace();
    let state = state.clone();
    let tenant_id = tenant_id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        for connection_id in &connection_ids {
            let _ = state.registry.transition(connection_id, ConnectionState::Closed);
            state.registry.force_close(connection_id);
        }
        info!(tenant_id = %tenant_id, "tenant connections force-closed after suspension grace");
    });
}

fn spawn_heartbeat_sweeper(state: Arc<SharedState>, shutdown: CancellationToken) {
    tokio::spawn(state.heartbeat.clone().run_sweeper(shutdown));
}

fn spawn_presence_sweeper(state: Arc<SharedState>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRESENCE_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let channel_ids = state.channels.channel_ids();
                    state.presence.sweep_stale(&state.channels, &channel_ids, now_ms(), PRESENCE_STALE_MS).await;
                }
            }
        }
    });
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Binds `state.config`'s host/port and runs the accept loop until
/// `shutdown` is cancelled.
pub async fn serve(state: Arc<SharedState>, evictions: mpsc::UnboundedReceiver<ConnectionId>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = state.config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    serve_on(listener, state, evictions, shutdown).await
}

/// Runs the accept loop on an already-bound listener until `shutdown` is
/// cancelled. Each accepted socket is handed to its own `handle_connection`
/// task; failures to accept are logged and retried rather than treated as
/// fatal. Split out from [`serve`] so tests can bind an ephemeral port.
pub async fn serve_on(
    listener: TcpListener,
    state: Arc<SharedState>,
    evictions: mpsc::UnboundedReceiver<ConnectionId>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(), "realtime-core listening");

    spawn_eviction_forwarder(state.clone(), evictions);
    spawn_heartbeat_sweeper(state.clone(), shutdown.clone());
    spawn_presence_sweeper(state.clone(), shutdown.clone());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        tracing::debug!(%peer_addr, "accepted connection");
                        tokio::spawn(handle_connection(stream, state.clone(), shutdown.clone()));
                    }
                    Err(err) => warn!(error = %err, "failed to accept connection"),
                }
            }
        }
    }

    info!("realtime-core shutting down");
    Ok(())
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
