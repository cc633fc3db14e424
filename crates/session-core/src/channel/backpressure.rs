// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded per-subscriber outbound queue with a configurable backpressure
//! policy.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;

use crate::codec::Packet;
use crate::config::BackpressureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    DroppedOldest,
    RejectedSlowConsumer,
}

/// A subscriber's outbound mailbox. `push` is called from the channel's
/// fan-out path; `pop` is called from the connection's writer task.
pub struct Outbox {
    capacity: usize,
    policy: BackpressureKind,
    slow_consumer_timeout: Duration,
    queue: Mutex<VecDeque<Packet>>,
    notify: Notify,
    lagged: AtomicBool,
}

impl Outbox {
    pub fn new(capacity: usize, policy: BackpressureKind, slow_consumer_timeout: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            policy,
            slow_consumer_timeout,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            lagged: AtomicBool::new(false),
        }
    }

    pub async fn push(&self, packet: Packet) -> PushOutcome {
        {
            let mut queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
            if queue.len() < self.capacity {
                queue.push_back(packet);
                self.notify.notify_one();
                return PushOutcome::Delivered;
            }
            if self.policy == BackpressureKind::DropOldest {
                queue.pop_front();
                queue.push_back(packet);
                self.lagged.store(true, Ordering::SeqCst);
                self.notify.notify_one();
                return PushOutcome::DroppedOldest;
            }
        }

        // SlowConsumer: wait for the consumer to make room before giving up.
        let deadline = timeout(self.slow_consumer_timeout, self.wait_for_room()).await;
        let mut queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
        if deadline.is_ok() && queue.len() < self.capacity {
            queue.push_back(packet);
            self.notify.notify_one();
            PushOutcome::Delivered
        } else {
            PushOutcome::RejectedSlowConsumer
        }
    }

    async fn wait_for_room(&self) {
        loop {
            {
                let queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
                if queue.len() < self.capacity {
                    return;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Pops the next queued packet along with whether this outbox has
    /// dropped a message to backpressure since the last `pop`. The caller
    /// surfaces that as a synthetic `lagged` event ahead of the packet.
    pub async fn pop(&self) -> (Packet, bool) {
        loop {
            {
                let mut queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
                if let Some(packet) = queue.pop_front() {
                    drop(queue);
                    self.notify.notify_one();
                    let lagged = self.lagged.swap(false, Ordering::SeqCst);
                    return (packet, lagged);
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "backpressure_tests.rs"]
mod tests;
