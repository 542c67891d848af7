//! Device presence monitoring.
//!
//! A background thread polls for the device file and notifies callbacks on
//! every connect/disconnect edge. Starting the monitor only reports future
//! transitions; call [`DeviceMonitor::check_connected`] once beforehand to
//! learn the state at startup.

use crate::device::subscribers::panic_message;
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Callback receiving the new presence state (`true` = connected).
pub type PresenceCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Reports whether the device is currently present.
pub type PresenceProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// Configuration for the presence monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub device_path: PathBuf,
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from("/dev/eeg/encrypted"),
            poll_interval: Duration::from_millis(100),
        }
    }
}

struct Shared {
    probe: PresenceProbe,
    callbacks: RwLock<Vec<PresenceCallback>>,
    connected: AtomicBool,
    stop_requested: AtomicBool,
}

impl Shared {
    fn check(&self) -> bool {
        let present = (self.probe)();
        // Whoever swaps in the new state owns the edge and notifies.
        if self.connected.swap(present, Ordering::SeqCst) != present {
            if present {
                tracing::info!("Headset connected");
            } else {
                tracing::info!("Headset disconnected");
            }
            let callbacks: Vec<PresenceCallback> = self.callbacks.read().clone();
            for callback in &callbacks {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(present))) {
                    tracing::warn!(
                        "Presence callback panicked: {}",
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        present
    }
}

/// Watches the headset device file for insertion and removal.
pub struct DeviceMonitor {
    shared: Arc<Shared>,
    poll_interval: Duration,
    thread_handle: Option<JoinHandle<()>>,
}

impl DeviceMonitor {
    /// Monitor the device file named in `config`.
    pub fn new(config: MonitorConfig) -> Self {
        let path = config.device_path.clone();
        Self::with_probe(config.poll_interval, Arc::new(move || device_present(&path)))
    }

    /// Monitor presence as reported by `probe`.
    pub fn with_probe(poll_interval: Duration, probe: PresenceProbe) -> Self {
        Self {
            shared: Arc::new(Shared {
                probe,
                callbacks: RwLock::new(Vec::new()),
                connected: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
            }),
            poll_interval,
            thread_handle: None,
        }
    }

    /// Register a callback for presence transitions.
    pub fn add_callback(&self, callback: PresenceCallback) {
        self.shared.callbacks.write().push(callback);
    }

    /// Check presence once, notifying callbacks if it changed.
    pub fn check_connected(&self) -> bool {
        self.shared.check()
    }

    /// Last known presence state.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Start polling in a background thread. Does nothing if already started.
    pub fn start(&mut self) {
        if self.thread_handle.is_some() {
            return;
        }
        self.shared.stop_requested.store(false, Ordering::SeqCst);

        let shared = self.shared.clone();
        let interval = self.poll_interval;
        let spawned = thread::Builder::new()
            .name("device-monitor".to_string())
            .spawn(move || {
                while !shared.stop_requested.load(Ordering::SeqCst) {
                    shared.check();
                    thread::sleep(interval);
                }
            });

        match spawned {
            Ok(handle) => self.thread_handle = Some(handle),
            Err(e) => tracing::error!("Could not spawn monitor thread: {}", e),
        }
    }

    /// Stop polling and wait for the thread to exit.
    pub fn stop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            self.shared.stop_requested.store(true, Ordering::SeqCst);
            if handle.join().is_err() {
                tracing::error!("Monitor thread panicked");
            }
            self.shared.stop_requested.store(false, Ordering::SeqCst);
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.thread_handle.is_some()
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Whether the device file exists.
pub fn device_present(path: &Path) -> bool {
    path.exists()
}
