//! Observability and Metrics
//!
//! Protocol counters for sessions and the reference peer.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for protocol operations
#[derive(Debug)]
pub struct Metrics {
    /// Frames written to a socket
    pub frames_sent: AtomicU64,
    /// Frames read from a socket (valid or not)
    pub frames_received: AtomicU64,
    /// Total bytes sent
    pub bytes_sent: AtomicU64,
    /// Total bytes received
    pub bytes_received: AtomicU64,
    /// Retransmissions of an already-encoded frame
    pub retransmissions: AtomicU64,
    /// Socket reads that timed out
    pub timeouts: AtomicU64,
    /// Frames rejected by the checksum
    pub checksum_failures: AtomicU64,
    /// Replies rejected for any other reason
    pub invalid_responses: AtomicU64,
    /// Discovery handshakes started
    pub discoveries_total: AtomicU64,
    /// Discovery handshakes that bound a device
    pub discoveries_success: AtomicU64,
    /// Discovery handshakes that gave up
    pub discoveries_failed: AtomicU64,
    /// Commands answered by a reference peer
    pub commands_served: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            retransmissions: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            checksum_failures: AtomicU64::new(0),
            invalid_responses: AtomicU64::new(0),
            discoveries_total: AtomicU64::new(0),
            discoveries_success: AtomicU64::new(0),
            discoveries_failed: AtomicU64::new(0),
            commands_served: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn frame_sent(&self, byte_count: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn frame_received(&self, byte_count: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn retransmission(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn checksum_failure(&self) {
        self.checksum_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalid_response(&self) {
        self.invalid_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn discovery_attempt(&self) {
        self.discoveries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn discovery_success(&self) {
        self.discoveries_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn discovery_failed(&self) {
        self.discoveries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_served(&self) {
        self.commands_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            invalid_responses: self.invalid_responses.load(Ordering::Relaxed),
            discoveries_total: self.discoveries_total.load(Ordering::Relaxed),
            discoveries_success: self.discoveries_success.load(Ordering::Relaxed),
            discoveries_failed: self.discoveries_failed.load(Ordering::Relaxed),
            commands_served: self.commands_served.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            frames_sent = snapshot.frames_sent,
            frames_received = snapshot.frames_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            retransmissions = snapshot.retransmissions,
            timeouts = snapshot.timeouts,
            checksum_failures = snapshot.checksum_failures,
            invalid_responses = snapshot.invalid_responses,
            discoveries_total = snapshot.discoveries_total,
            discoveries_success = snapshot.discoveries_success,
            discoveries_failed = snapshot.discoveries_failed,
            commands_served = snapshot.commands_served,
            uptime_seconds = snapshot.uptime_seconds,
            "Protocol metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
    pub checksum_failures: u64,
    pub invalid_responses: u64,
    pub discoveries_total: u64,
    pub discoveries_success: u64,
    pub discoveries_failed: u64,
    pub commands_served: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
