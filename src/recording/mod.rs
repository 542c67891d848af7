//! Packet recording and acquisition statistics.

pub mod stats;
pub mod writer;

// Re-export commonly used types
pub use stats::{
    create_shared_stats, create_shared_stats_with_persistence, AcquisitionStats, SharedStats,
    StatsSnapshot,
};
pub use writer::{format_packet_line, CsvRecorder, RecorderError};
