// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn pong_resets_missed_count() {
    let mut liveness = ConnectionLiveness::new(Instant::now());
    liveness.mark_ping_sent(Instant::now());
    liveness.record_missed(3);
    assert_eq!(liveness.missed_count, 1);
    liveness.record_pong(Instant::now());
    assert_eq!(liveness.missed_count, 0);
    assert_eq!(liveness.phase, LivenessPhase::Scheduled);
}

#[test]
fn evicts_after_max_missed() {
    let mut liveness = ConnectionLiveness::new(Instant::now());
    assert!(!liveness.record_missed(3));
    assert!(!liveness.record_missed(3));
    assert!(liveness.record_missed(3));
    assert_eq!(liveness.phase, LivenessPhase::Evicted);
}

#[test]
fn evicted_connection_ignores_late_pong() {
    let mut liveness = ConnectionLiveness::new(Instant::now());
    liveness.record_missed(1);
    assert_eq!(liveness.phase, LivenessPhase::Evicted);
    assert!(!liveness.record_pong(Instant::now()));
    assert_eq!(liveness.phase, LivenessPhase::Evicted);
}
