//! Acquisition loop: reads, decrypts and decodes frames on a dedicated thread.
//!
//! ```text
//!  device ──▶ poll/read 32 B ──▶ decrypt ──▶ decode ──┬──▶ PacketQueue
//!                                                     ├──▶ subscribers
//!                                                     └──▶ device state
//! ```
//!
//! Cancellation is cooperative. The loop checks its stop flag between polls,
//! and every poll waits at most `poll_interval`, so a stop request is observed
//! within one poll interval. Opening the device happens before the first check
//! and cannot be interrupted.

use crate::device::cipher::FrameCipher;
use crate::device::decoder::decode_frame;
use crate::device::queue::PacketQueue;
use crate::device::source::{device_opener, FrameSource, SourceOpener};
use crate::device::state::SharedDeviceState;
use crate::device::subscribers::SubscriberRegistry;
use crate::device::types::RawFrame;
use crate::recording::stats::{create_shared_stats, SharedStats};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Number of packet timestamps used for the rate estimate.
pub const RATE_WINDOW: usize = 128;

/// Configuration for the acquisition loop.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Character device carrying encrypted frames
    pub device_path: PathBuf,
    /// Longest wait for data before the stop flag is checked again
    pub poll_interval: Duration,
    /// Optional packet queue bound
    pub queue_capacity: Option<usize>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from("/dev/eeg/encrypted"),
            poll_interval: Duration::from_millis(100),
            queue_capacity: None,
        }
    }
}

/// Lifecycle of the acquisition thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderStatus {
    Stopped,
    /// Thread spawned, device not yet open
    Starting,
    Running,
}

impl ReaderStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ReaderStatus::Starting,
            2 => ReaderStatus::Running,
            _ => ReaderStatus::Stopped,
        }
    }
}

/// Packets-per-second estimate over the last [`RATE_WINDOW`] arrivals.
#[derive(Debug)]
pub struct RateTracker {
    stamps: [Option<Instant>; RATE_WINDOW],
    next: usize,
}

impl RateTracker {
    pub fn new() -> Self {
        Self {
            stamps: [None; RATE_WINDOW],
            next: 0,
        }
    }

    /// Record an arrival and return the current rate.
    ///
    /// Reports 0 until a full window of arrivals has been seen.
    pub fn record(&mut self, now: Instant) -> f64 {
        self.stamps[self.next] = Some(now);
        self.next = (self.next + 1) % RATE_WINDOW;

        // The slot after the newest one holds the arrival RATE_WINDOW packets ago.
        match self.stamps[self.next] {
            Some(oldest) => {
                let elapsed = now.duration_since(oldest).as_secs_f64();
                if elapsed > 0.0 {
                    RATE_WINDOW as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the acquisition thread needs, shared with the owning reader.
struct Shared {
    cipher: FrameCipher,
    queue: PacketQueue,
    subscribers: SubscriberRegistry,
    state: SharedDeviceState,
    stats: SharedStats,
    status: AtomicU8,
    stop_requested: AtomicBool,
    poll_interval: Duration,
}

impl Shared {
    fn set_status(&self, status: ReaderStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }
}

/// Owns the headset acquisition thread.
pub struct HeadsetReader {
    shared: Arc<Shared>,
    opener: SourceOpener,
    thread_handle: Option<JoinHandle<()>>,
}

impl HeadsetReader {
    /// Create a reader for the character device named in `config`.
    pub fn new(config: ReaderConfig, cipher: FrameCipher) -> Self {
        let opener = device_opener(config.device_path.clone());
        Self::with_opener(config, cipher, opener)
    }

    /// Create a reader that opens its frames through `opener`.
    pub fn with_opener(config: ReaderConfig, cipher: FrameCipher, opener: SourceOpener) -> Self {
        let shared = Shared {
            cipher,
            queue: PacketQueue::with_capacity(config.queue_capacity),
            subscribers: SubscriberRegistry::new(),
            state: SharedDeviceState::new(),
            stats: create_shared_stats(),
            status: AtomicU8::new(ReaderStatus::Stopped as u8),
            stop_requested: AtomicBool::new(false),
            poll_interval: config.poll_interval,
        };
        Self {
            shared: Arc::new(shared),
            opener,
            thread_handle: None,
        }
    }

    /// Replace the statistics sink.
    ///
    /// Only takes effect while no acquisition thread holds the shared state;
    /// otherwise the current sink is kept and a warning is logged.
    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.stats = stats,
            None => tracing::warn!("Reader is running; keeping its current statistics sink"),
        }
        self
    }

    /// Start the acquisition thread.
    ///
    /// Does nothing if a thread is already starting or running. If the device
    /// cannot be opened the thread exits and the reader stays stopped; use a
    /// [`DeviceMonitor`](crate::device::DeviceMonitor) to learn why.
    pub fn start(&mut self) {
        if self.status() != ReaderStatus::Stopped {
            return;
        }
        // Reap a thread that already ended on its own.
        self.join_thread();

        self.shared.stop_requested.store(false, Ordering::SeqCst);
        self.shared.set_status(ReaderStatus::Starting);

        let shared = self.shared.clone();
        let opener = self.opener.clone();
        let spawned = thread::Builder::new()
            .name("headset-reader".to_string())
            .spawn(move || {
                run_acquisition(&shared, &opener);
                shared.stop_requested.store(false, Ordering::SeqCst);
                shared.set_status(ReaderStatus::Stopped);
            });

        match spawned {
            Ok(handle) => self.thread_handle = Some(handle),
            Err(e) => {
                tracing::error!("Could not spawn reader thread: {}", e);
                self.shared.set_status(ReaderStatus::Stopped);
            }
        }
    }

    /// Stop the acquisition thread and wait for it to exit.
    ///
    /// Blocks for at most one poll interval once the device is open. A no-op
    /// when the reader is not running.
    pub fn stop(&mut self) {
        if self.thread_handle.is_none() {
            return;
        }
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        self.join_thread();
        self.shared.stop_requested.store(false, Ordering::SeqCst);
    }

    fn join_thread(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Reader thread panicked");
                self.shared.set_status(ReaderStatus::Stopped);
            }
        }
    }

    pub fn status(&self) -> ReaderStatus {
        ReaderStatus::from_u8(self.shared.status.load(Ordering::SeqCst))
    }

    /// Whether the device is open and being read.
    pub fn is_running(&self) -> bool {
        self.status() == ReaderStatus::Running
    }

    /// Queue of decoded packets for pull consumers.
    pub fn queue(&self) -> &PacketQueue {
        &self.shared.queue
    }

    /// Subscribers invoked for every decoded packet.
    pub fn subscribers(&self) -> &SubscriberRegistry {
        &self.shared.subscribers
    }

    /// Aggregate device state.
    pub fn state(&self) -> &SharedDeviceState {
        &self.shared.state
    }

    pub fn stats(&self) -> &SharedStats {
        &self.shared.stats
    }

    /// Forget the device state and drop every queued packet.
    pub fn clear_state(&self) {
        self.shared.state.reset();
        let dropped = self.shared.queue.clear();
        tracing::debug!(dropped, "Cleared reader state");
    }
}

impl Drop for HeadsetReader {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for HeadsetReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadsetReader")
            .field("status", &self.status())
            .field("queued", &self.shared.queue.len())
            .field("subscribers", &self.shared.subscribers.len())
            .finish()
    }
}

fn run_acquisition(shared: &Shared, opener: &SourceOpener) {
    let mut source = match opener() {
        Ok(source) => source,
        Err(e) => {
            tracing::debug!("Could not open headset device: {}", e);
            return;
        }
    };

    shared.set_status(ReaderStatus::Running);
    tracing::info!("Headset reader started");

    if let Err(e) = read_loop(shared, source.as_mut()) {
        tracing::debug!("Headset reader terminated: {}", e);
    }

    tracing::info!("Headset reader stopped");
}

fn read_loop(shared: &Shared, source: &mut dyn FrameSource) -> std::io::Result<()> {
    let mut rate = RateTracker::new();

    while !shared.stop_requested.load(Ordering::SeqCst) {
        match source.poll_frame(shared.poll_interval)? {
            Some(frame) => {
                shared.state.set_packet_rate(rate.record(Instant::now()));
                handle_frame(shared, &frame);
            }
            None => shared.state.set_packet_rate(0.0),
        }
    }
    Ok(())
}

fn handle_frame(shared: &Shared, frame: &RawFrame) {
    shared.stats.record_frame_read();

    let plain = shared.cipher.decrypt_frame(frame);
    let packet = match decode_frame(&plain) {
        Ok(packet) => packet,
        Err(e) => {
            shared.stats.record_decode_error();
            tracing::warn!("Dropping undecodable frame: {}", e);
            return;
        }
    };
    shared.stats.record_packet_decoded();

    if shared.queue.push(packet.clone()) {
        shared.stats.record_queue_overflow();
    }

    let failures = shared.subscribers.dispatch(&packet);
    if failures > 0 {
        shared.stats.record_subscriber_failures(failures as u64);
    }

    shared.state.apply(&packet);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::cipher::derive_key;
    use crate::device::decoder::encode_frame;
    use crate::device::source::ReplaySource;
    use crate::device::types::{DataPacket, CHANNEL_COUNT, FRAME_LEN};
    use aes::cipher::{BlockEncrypt, KeyInit};
    use aes::{Aes128, Block};
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    const SERIAL: &str = "SN20120229000254";

    fn encrypt(plain: &[u8; FRAME_LEN]) -> RawFrame {
        let aes = Aes128::new(&derive_key(SERIAL).unwrap().into());
        let mut frame = [0u8; FRAME_LEN];
        for (src, dst) in plain.chunks_exact(16).zip(frame.chunks_exact_mut(16)) {
            let mut block = Block::clone_from_slice(src);
            aes.encrypt_block(&mut block);
            dst.copy_from_slice(&block);
        }
        frame
    }

    fn config() -> ReaderConfig {
        ReaderConfig {
            poll_interval: Duration::from_millis(10),
            ..ReaderConfig::default()
        }
    }

    fn cipher() -> FrameCipher {
        FrameCipher::from_serial(SERIAL).unwrap()
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Opener replaying `frames` once, then an endless stream of timeouts.
    fn replay_then_idle(frames: Vec<RawFrame>) -> SourceOpener {
        Arc::new(move || {
            let mut items: Vec<Option<RawFrame>> = frames.iter().copied().map(Some).collect();
            items.extend(std::iter::repeat(None).take(10_000));
            let source: Box<dyn FrameSource> = Box::new(ReplaySource::new(items));
            Ok(source)
        })
    }

    #[test]
    fn test_stop_when_not_running_is_noop() {
        let mut reader = HeadsetReader::with_opener(config(), cipher(), replay_then_idle(vec![]));
        reader.stop();
        assert_eq!(reader.status(), ReaderStatus::Stopped);
    }

    #[test]
    fn test_open_failure_stays_stopped() {
        let opener: SourceOpener = Arc::new(|| {
            Err(io::Error::new(io::ErrorKind::NotFound, "no device"))
        });
        let mut reader = HeadsetReader::with_opener(config(), cipher(), opener);
        reader.start();
        wait_until(|| reader.status() == ReaderStatus::Stopped);
        reader.stop();
        assert!(!reader.is_running());
    }

    #[test]
    fn test_double_start_spawns_one_thread() {
        let opens = Arc::new(AtomicUsize::new(0));
        let counter = opens.clone();
        let inner = replay_then_idle(vec![]);
        let opener: SourceOpener = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            inner()
        });

        let mut reader = HeadsetReader::with_opener(config(), cipher(), opener);
        reader.start();
        reader.start();
        wait_until(|| reader.is_running());
        reader.start();
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        reader.stop();
        assert_eq!(reader.status(), ReaderStatus::Stopped);

        // Restart right away after a stop.
        reader.start();
        wait_until(|| reader.is_running());
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        reader.stop();
    }

    #[test]
    fn test_frames_flow_to_queue_subscribers_and_state() {
        let levels: [u16; CHANNEL_COUNT] = std::array::from_fn(|i| 4000 + i as u16);
        let mut frames: Vec<RawFrame> = (0..20u8)
            .map(|c| encrypt(&encode_frame(c, (100 + c, 50), &levels, 600 + u16::from(c))))
            .collect();
        let mut battery = encode_frame(0, (1, 2), &levels, 0);
        battery[0] = 248;
        frames.push(encrypt(&battery));

        let mut reader = HeadsetReader::with_opener(config(), cipher(), replay_then_idle(frames));
        let (tx, rx) = mpsc::channel();
        let tx = parking_lot::Mutex::new(tx);
        reader.subscribers().subscribe(Arc::new(move |p: &DataPacket| {
            let _ = tx.lock().send(p.counter);
        }));

        reader.start();
        wait_until(|| reader.queue().len() == 21);
        reader.stop();

        let counters: Vec<u8> = reader.queue().drain().map(|p| p.counter).collect();
        let mut expected: Vec<u8> = (0..20).collect();
        expected.push(128);
        assert_eq!(counters, expected);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), expected);

        let state = reader.state().snapshot();
        assert_eq!(state.battery, Some(1.0));
        assert_eq!(state.gyro, Some((1, 2)));
        assert_eq!(state.contact_quality[13], 613.0);
        assert_eq!(reader.stats().stats().packets_decoded, 21);
    }

    #[test]
    fn test_io_error_ends_session() {
        let frames = vec![encrypt(&encode_frame(1, (0, 0), &[4096; CHANNEL_COUNT], 0))];
        let opener: SourceOpener = Arc::new(move || {
            let source: Box<dyn FrameSource> =
                Box::new(ReplaySource::new(frames.iter().copied().map(Some)));
            Ok(source)
        });
        let mut reader = HeadsetReader::with_opener(config(), cipher(), opener);
        reader.start();
        wait_until(|| reader.status() == ReaderStatus::Stopped && reader.queue().len() == 1);

        // The reader can be started again after the device went away.
        reader.start();
        wait_until(|| reader.status() == ReaderStatus::Stopped && reader.queue().len() == 2);
        reader.stop();
    }

    #[test]
    fn test_failing_subscriber_does_not_halt_acquisition() {
        let frames: Vec<RawFrame> = (0..5u8)
            .map(|c| encrypt(&encode_frame(c, (0, 0), &[4096; CHANNEL_COUNT], 0)))
            .collect();
        let mut reader = HeadsetReader::with_opener(config(), cipher(), replay_then_idle(frames));
        reader
            .subscribers()
            .subscribe(Arc::new(|_: &DataPacket| panic!("subscriber bug")));

        reader.start();
        wait_until(|| reader.queue().len() == 5);
        reader.stop();
        assert_eq!(reader.stats().stats().subscriber_failures, 5);
    }

    #[test]
    fn test_clear_state() {
        let frames: Vec<RawFrame> = (0..3u8)
            .map(|c| encrypt(&encode_frame(c, (9, 9), &[4096; CHANNEL_COUNT], 700)))
            .collect();
        let mut reader = HeadsetReader::with_opener(config(), cipher(), replay_then_idle(frames));
        reader.start();
        wait_until(|| reader.queue().len() == 3);
        reader.stop();

        reader.clear_state();
        assert!(reader.queue().is_empty());
        assert_eq!(reader.state().gyro(), None);
        assert_eq!(reader.state().contact_quality(crate::device::Channel::F3), 0.0);
    }

    #[test]
    fn test_packet_rate_follows_stream_and_resets_on_timeout() {
        let frames: Vec<RawFrame> = (0..130usize)
            .map(|i| {
                let counter = (i % 128) as u8;
                encrypt(&encode_frame(counter, (0, 0), &[4096; CHANNEL_COUNT], 0))
            })
            .collect();
        let mut reader = HeadsetReader::with_opener(config(), cipher(), replay_then_idle(frames));

        // The rate is stored before subscribers run, so each one sees the
        // estimate including its own packet.
        let state = reader.state().clone();
        let rates = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = rates.clone();
        reader.subscribers().subscribe(Arc::new(move |_: &DataPacket| {
            sink.lock().push(state.packet_rate());
        }));

        reader.start();
        wait_until(|| rates.lock().len() == 130);
        // The idle tail times out and zeroes the estimate.
        wait_until(|| reader.state().packet_rate() == 0.0);
        reader.stop();

        let rates = rates.lock();
        assert!(rates[..RATE_WINDOW - 1].iter().all(|&r| r == 0.0));
        assert!(rates[RATE_WINDOW - 1..].iter().all(|&r| r > 0.0), "{rates:?}");
    }

    #[test]
    fn test_with_stats_ignored_while_running() {
        let mut reader = HeadsetReader::with_opener(config(), cipher(), replay_then_idle(vec![]));
        let original = reader.stats().clone();

        reader.start();
        wait_until(|| reader.is_running());
        let mut reader = reader.with_stats(create_shared_stats());
        assert!(Arc::ptr_eq(reader.stats(), &original));
        reader.stop();

        let replacement = create_shared_stats();
        let reader = reader.with_stats(replacement.clone());
        assert!(Arc::ptr_eq(reader.stats(), &replacement));
    }

    #[test]
    fn test_rate_tracker() {
        let mut tracker = RateTracker::new();
        let start = Instant::now();
        let step = Duration::from_micros(7812);
        let mut rate = 0.0;
        for i in 0..RATE_WINDOW as u32 {
            rate = tracker.record(start + step * i);
            if i < RATE_WINDOW as u32 - 1 {
                assert_eq!(rate, 0.0);
            }
        }
        // 128 arrivals span 127 steps.
        assert!(rate > 128.0 && rate < 130.0, "rate {rate}");

        let rate = tracker.record(start + step * RATE_WINDOW as u32);
        assert!((rate - 128.0 / (step.as_secs_f64() * 127.0)).abs() < 1e-6);
    }
}
