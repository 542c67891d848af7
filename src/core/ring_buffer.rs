//! Rolling signal buffer with a contiguous, zero-copy view of recent history.
//!
//! Storage is twice the window length. Every row is written at the cursor and
//! mirrored `N` rows earlier, so the `N` rows ending at the cursor are always
//! the most recent samples in arrival order:
//!
//! ```text
//!   rows 0..N        rows N..2N
//!  [ mirror half  ][ primary half ]
//!        ^-------- window --------^   window = [end - N, end)
//! ```
//!
//! When the cursor reaches `2N` it jumps back to `N`; the mirror half already
//! holds the last `N` rows at that point, so the window never wraps.

use crate::device::queue::PacketQueue;
use crate::device::types::CHANNEL_COUNT;

/// Default pre-fill value, a neutral baseline for plots.
pub const DEFAULT_FILL: f64 = 8000.0;

/// Errors raised when constructing a [`SignalRingBuffer`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("window length must be at least 1")]
    EmptyWindow,
}

/// Double-length circular buffer of channel samples.
///
/// Has no internal synchronization: a single consumer calls
/// [`pull`](Self::pull) and [`window`](Self::window).
#[derive(Debug, Clone)]
pub struct SignalRingBuffer {
    /// Row-major `2N x CHANNEL_COUNT` storage
    data: Vec<f64>,
    window_len: usize,
    /// One past the newest row, always in `N..2N`
    end: usize,
}

impl SignalRingBuffer {
    /// Allocate a buffer exposing `window_len` rows, pre-filled with `fill`.
    pub fn new(window_len: usize, fill: f64) -> Result<Self, BufferError> {
        if window_len == 0 {
            return Err(BufferError::EmptyWindow);
        }
        Ok(Self {
            data: vec![fill; 2 * window_len * CHANNEL_COUNT],
            window_len,
            end: window_len,
        })
    }

    /// Number of rows in the window.
    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// Number of columns per row.
    pub fn channel_count(&self) -> usize {
        CHANNEL_COUNT
    }

    /// Append one row of samples.
    pub fn push_row(&mut self, row: &[f64; CHANNEL_COUNT]) {
        let primary = self.end;
        let mirror = self.end - self.window_len;
        self.row_mut(primary).copy_from_slice(row);
        self.row_mut(mirror).copy_from_slice(row);

        self.end += 1;
        if self.end == 2 * self.window_len {
            self.end = self.window_len;
        }
    }

    /// Drain every packet currently queued into the buffer.
    ///
    /// Never blocks; returns the number of packets consumed.
    pub fn pull(&mut self, queue: &PacketQueue) -> usize {
        let mut pulled = 0;
        while let Some(packet) = queue.try_pop() {
            self.push_row(&packet.channels);
            pulled += 1;
        }
        pulled
    }

    /// The most recent `window_len` rows, oldest first.
    pub fn window(&self) -> WindowView<'_> {
        let start = (self.end - self.window_len) * CHANNEL_COUNT;
        let stop = self.end * CHANNEL_COUNT;
        WindowView {
            data: &self.data[start..stop],
        }
    }

    /// Zero the whole buffer. The cursor is left alone.
    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    fn row_mut(&mut self, row: usize) -> &mut [f64] {
        let start = row * CHANNEL_COUNT;
        &mut self.data[start..start + CHANNEL_COUNT]
    }
}

/// Borrowed view of the buffer window.
#[derive(Debug, Clone, Copy)]
pub struct WindowView<'a> {
    data: &'a [f64],
}

impl<'a> WindowView<'a> {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.data.len() / CHANNEL_COUNT
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Samples of row `index`, oldest row being 0.
    pub fn row(&self, index: usize) -> Option<&'a [f64]> {
        let start = index.checked_mul(CHANNEL_COUNT)?;
        self.data.get(start..start + CHANNEL_COUNT)
    }

    /// Iterate rows oldest first.
    pub fn rows(&self) -> impl Iterator<Item = &'a [f64]> + 'a {
        self.data.chunks_exact(CHANNEL_COUNT)
    }

    /// Iterate one column oldest first.
    pub fn channel(&self, channel: usize) -> impl Iterator<Item = f64> + 'a {
        self.data
            .chunks_exact(CHANNEL_COUNT)
            .filter_map(move |row| row.get(channel).copied())
    }

    /// Row-major samples.
    pub fn as_slice(&self) -> &'a [f64] {
        self.data
    }

    /// Owned copy of the rows.
    pub fn to_rows(&self) -> Vec<[f64; CHANNEL_COUNT]> {
        self.rows()
            .map(|row| {
                let mut out = [0.0; CHANNEL_COUNT];
                out.copy_from_slice(row);
                out
            })
            .collect()
    }
}
