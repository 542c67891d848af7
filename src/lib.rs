//! Wave Rider - acquisition and decoding of encrypted EEG headset streams.
//!
//! The headset exposes a character device that yields 32-byte AES-encrypted
//! frames at 128 Hz. This library reads that device on a dedicated thread,
//! decrypts and decodes every frame into a [`DataPacket`] with 14 EEG channels,
//! gyro bytes, battery level and contact quality, and hands the packets to
//! consumers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Wave Rider                              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────┐   │
//! │  │  Device  │──▶│ Decrypt  │──▶│  Decode  │──▶│ PacketQueue  │──▶ SignalRingBuffer
//! │  │  (read)  │   │ (AES-ECB)│   │ (bits)   │   └──────────────┘   │
//! │  └──────────┘   └──────────┘   └──────────┘          │           │
//! │       ▲                              │               ▼           │
//! │  ┌──────────┐                        ├──────▶  Subscribers        │
//! │  │ Monitor  │                        └──────▶  Device state       │
//! │  └──────────┘                                                     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use wave_rider::core::SignalRingBuffer;
//! use wave_rider::device::{DeviceMonitor, FrameCipher, HeadsetReader, MonitorConfig, ReaderConfig};
//!
//! let cipher = FrameCipher::from_serial("SN20120229000254").expect("serial too short");
//! let mut reader = HeadsetReader::new(ReaderConfig::default(), cipher);
//!
//! let monitor = DeviceMonitor::new(MonitorConfig::default());
//! if monitor.check_connected() {
//!     reader.start();
//! }
//!
//! let mut buffer = SignalRingBuffer::new(768, 8000.0).expect("non-empty window");
//! buffer.pull(reader.queue());
//! let window = buffer.window();
//! ```

pub mod config;
pub mod core;
pub mod device;
pub mod recording;

// Re-export key types at crate root for convenience
pub use crate::core::{SignalRingBuffer, WindowView};
pub use config::{Config, ConfigError};
pub use device::{
    Channel, DataPacket, DeviceMonitor, FrameCipher, HeadsetReader, PacketQueue,
    SharedDeviceState, SubscriberRegistry,
};
pub use recording::{AcquisitionStats, CsvRecorder};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
