//! Counters describing a client's connection history

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Live counters, shared between the controller and the copy loops
#[derive(Debug, Default)]
pub struct ClientStats {
    dial_attempts: AtomicU64,
    dial_failures: AtomicU64,
    handshakes: AtomicU64,
    write_failures: AtomicU64,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    active_downstream_loops: AtomicUsize,
}

/// Point-in-time copy of [`ClientStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub dial_attempts: u64,
    pub dial_failures: u64,
    /// Successful dial + identity handshakes, i.e. link generations created
    pub handshakes: u64,
    pub write_failures: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    /// Never more than one
    pub active_downstream_loops: usize,
}

impl ClientStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dial_attempts: self.dial_attempts.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            handshakes: self.handshakes.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            active_downstream_loops: self.active_downstream_loops.load(Ordering::Acquire),
        }
    }

    pub(crate) fn record_dial(&self) {
        self.dial_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dial_failure(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handshake(&self) {
        self.handshakes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Returns the number of loops alive after this one started
    pub(crate) fn downstream_started(&self) -> usize {
        self.active_downstream_loops.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn downstream_stopped(&self) {
        self.active_downstream_loops.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let stats = ClientStats::default();
        stats.record_dial();
        stats.record_dial();
        stats.record_dial_failure();
        stats.record_handshake();
        stats.record_sent(20);
        stats.record_received(40);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.dial_attempts, 2);
        assert_eq!(snapshot.dial_failures, 1);
        assert_eq!(snapshot.handshakes, 1);
        assert_eq!(snapshot.packets_sent, 1);
        assert_eq!(snapshot.bytes_sent, 20);
        assert_eq!(snapshot.bytes_received, 40);
    }

    #[test]
    fn test_downstream_loop_gauge() {
        let stats = ClientStats::default();
        assert_eq!(stats.downstream_started(), 1);
        stats.downstream_stopped();
        assert_eq!(stats.snapshot().active_downstream_loops, 0);
    }
}
