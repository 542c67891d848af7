//! Signal buffering for consumers of the decoded stream.
//!
//! This module contains the rolling signal buffer that gives display and
//! analysis code a contiguous view of the most recent samples.

pub mod ring_buffer;

// Re-export commonly used types
pub use ring_buffer::{BufferError, SignalRingBuffer, WindowView, DEFAULT_FILL};
