//! Acquisition statistics.
//!
//! Counters are updated by the acquisition thread and can be read from any
//! thread. Optionally persisted so `wave-rider status` can show cumulative
//! totals across sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Counters for one acquisition session.
#[derive(Debug)]
pub struct AcquisitionStats {
    /// Encrypted frames read from the device
    frames_read: AtomicU64,
    /// Frames decoded into packets
    packets_decoded: AtomicU64,
    /// Frames that failed to decode
    decode_errors: AtomicU64,
    /// Subscriber invocations that returned an error or panicked
    subscriber_failures: AtomicU64,
    /// Packets discarded because the packet queue was full
    queue_overflows: AtomicU64,
    /// Session identifier
    session_id: Uuid,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl AcquisitionStats {
    pub fn new() -> Self {
        Self {
            frames_read: AtomicU64::new(0),
            packets_decoded: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            subscriber_failures: AtomicU64::new(0),
            queue_overflows: AtomicU64::new(0),
            session_id: Uuid::new_v4(),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create statistics that accumulate on top of the totals stored at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("Could not load previous statistics: {}", e);
        }

        stats
    }

    pub fn record_frame_read(&self) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_packet_decoded(&self) {
        self.packets_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscriber_failures(&self, count: u64) {
        self.subscriber_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_queue_overflow(&self) {
        self.queue_overflows.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            packets_decoded: self.packets_decoded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            subscriber_failures: self.subscriber_failures.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            session_id: self.session_id,
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Acquisition Statistics:\n\
             - Session: {}\n\
             - Frames read: {}\n\
             - Packets decoded: {}\n\
             - Decode errors: {}\n\
             - Subscriber failures: {}\n\
             - Queue overflows: {}\n\
             - Session duration: {} seconds",
            stats.session_id,
            stats.frames_read,
            stats.packets_decoded,
            stats.decode_errors,
            stats.subscriber_failures,
            stats.queue_overflows,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                frames_read: stats.frames_read,
                packets_decoded: stats.packets_decoded,
                decode_errors: stats.decode_errors,
                subscriber_failures: stats.subscriber_failures,
                queue_overflows: stats.queue_overflows,
                last_session: stats.session_id,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.frames_read
                    .store(persisted.frames_read, Ordering::Relaxed);
                self.packets_decoded
                    .store(persisted.packets_decoded, Ordering::Relaxed);
                self.decode_errors
                    .store(persisted.decode_errors, Ordering::Relaxed);
                self.subscriber_failures
                    .store(persisted.subscriber_failures, Ordering::Relaxed);
                self.queue_overflows
                    .store(persisted.queue_overflows, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.frames_read.store(0, Ordering::Relaxed);
        self.packets_decoded.store(0, Ordering::Relaxed);
        self.decode_errors.store(0, Ordering::Relaxed);
        self.subscriber_failures.store(0, Ordering::Relaxed);
        self.queue_overflows.store(0, Ordering::Relaxed);
    }
}

impl Default for AcquisitionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub frames_read: u64,
    pub packets_decoded: u64,
    pub decode_errors: u64,
    pub subscriber_failures: u64,
    pub queue_overflows: u64,
    pub session_id: Uuid,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// On-disk format.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    frames_read: u64,
    packets_decoded: u64,
    decode_errors: u64,
    subscriber_failures: u64,
    queue_overflows: u64,
    last_session: Uuid,
    last_updated: DateTime<Utc>,
}

/// Statistics shared between the reader thread and observers.
pub type SharedStats = Arc<AcquisitionStats>;

pub fn create_shared_stats() -> SharedStats {
    Arc::new(AcquisitionStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedStats {
    Arc::new(AcquisitionStats::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = AcquisitionStats::new();

        stats.record_frame_read();
        stats.record_frame_read();
        stats.record_packet_decoded();
        stats.record_decode_error();
        stats.record_subscriber_failures(3);

        let snapshot = stats.stats();
        assert_eq!(snapshot.frames_read, 2);
        assert_eq!(snapshot.packets_decoded, 1);
        assert_eq!(snapshot.decode_errors, 1);
        assert_eq!(snapshot.subscriber_failures, 3);
        assert_eq!(snapshot.queue_overflows, 0);
    }

    #[test]
    fn test_reset() {
        let stats = AcquisitionStats::new();
        stats.record_queue_overflow();
        stats.record_packet_decoded();
        stats.reset();

        let snapshot = stats.stats();
        assert_eq!(snapshot.queue_overflows, 0);
        assert_eq!(snapshot.packets_decoded, 0);
    }

    #[test]
    fn test_persistence_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats").join("acquisition.json");

        let first = AcquisitionStats::with_persistence(path.clone());
        first.record_frame_read();
        first.record_packet_decoded();
        first.save().unwrap();

        let second = AcquisitionStats::with_persistence(path);
        second.record_frame_read();
        let snapshot = second.stats();
        assert_eq!(snapshot.frames_read, 2);
        assert_eq!(snapshot.packets_decoded, 1);
        assert_ne!(snapshot.session_id, first.stats().session_id);
    }

    #[test]
    fn test_summary_format() {
        let summary = AcquisitionStats::new().summary();
        assert!(summary.contains("Frames read"));
        assert!(summary.contains("Decode errors"));
        assert!(summary.contains("Queue overflows"));
    }
}
