//! Headset acquisition.
//!
//! This module turns the encrypted byte stream of the headset's character
//! device into decoded packets and makes them available three ways: a pull
//! queue, synchronous subscribers, and an aggregate device state.

pub mod cipher;
pub mod decoder;
pub mod monitor;
pub mod queue;
pub mod reader;
pub mod source;
pub mod state;
pub mod subscribers;
pub mod types;

// Re-export commonly used types
pub use cipher::{derive_key, CipherError, FrameCipher};
pub use decoder::{decode_frame, encode_frame, DecodeError};
pub use monitor::{device_present, DeviceMonitor, MonitorConfig, PresenceCallback};
pub use queue::PacketQueue;
pub use reader::{HeadsetReader, ReaderConfig, ReaderStatus};
pub use source::{device_opener, DeviceFile, FrameSource, ReplaySource, SourceOpener};
pub use state::{contact_resistance, ContactResistance, DeviceState, SharedDeviceState};
pub use subscribers::{ChannelSubscriber, PacketSubscriber, SubscriberError, SubscriberRegistry};
pub use types::{Channel, ContactQualitySample, DataPacket, RawFrame, CHANNEL_COUNT, FRAME_LEN};
