//! Packet and channel types for the headset stream.
//!
//! A [`DataPacket`] is produced once per decrypted 32-byte frame and is never
//! mutated afterwards; consumers either read it in place or copy it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size of one encrypted (and decrypted) frame in bytes.
pub const FRAME_LEN: usize = 32;

/// Number of EEG channels carried in every frame.
pub const CHANNEL_COUNT: usize = 14;

/// Counter value used for battery frames (raw counter > 127).
pub const BATTERY_COUNTER: u8 = 128;

/// One ciphertext frame as read from the device.
pub type RawFrame = [u8; FRAME_LEN];

/// EEG electrode positions in canonical (frame and contact-quality) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    F3,
    FC5,
    AF3,
    F7,
    T7,
    P7,
    O1,
    O2,
    P8,
    T8,
    F8,
    AF4,
    FC6,
    F4,
}

impl Channel {
    /// All channels, index `i` holding the channel with index `i`.
    pub const ALL: [Channel; CHANNEL_COUNT] = [
        Channel::F3,
        Channel::FC5,
        Channel::AF3,
        Channel::F7,
        Channel::T7,
        Channel::P7,
        Channel::O1,
        Channel::O2,
        Channel::P8,
        Channel::T8,
        Channel::F8,
        Channel::AF4,
        Channel::FC6,
        Channel::F4,
    ];

    /// Column index of this channel in packets and buffers.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Channel at the given index, if any.
    pub fn from_index(index: usize) -> Option<Channel> {
        Self::ALL.get(index).copied()
    }

    /// Electrode name as printed on the headset.
    pub fn name(self) -> &'static str {
        match self {
            Channel::F3 => "F3",
            Channel::FC5 => "FC5",
            Channel::AF3 => "AF3",
            Channel::F7 => "F7",
            Channel::T7 => "T7",
            Channel::P7 => "P7",
            Channel::O1 => "O1",
            Channel::O2 => "O2",
            Channel::P8 => "P8",
            Channel::T8 => "T8",
            Channel::F8 => "F8",
            Channel::AF4 => "AF4",
            Channel::FC6 => "FC6",
            Channel::F4 => "F4",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when a string does not name a known electrode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown channel name '{0}'")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}

/// Contact-quality reading carried by frames with counter 0..=13.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContactQualitySample {
    /// Electrode this reading belongs to
    pub channel: Channel,
    /// Raw 14-bit contact-quality level
    pub value: f64,
}

/// A decoded headset frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPacket {
    /// Packet counter, 0..=127 for data frames, 128 for battery frames
    pub counter: u8,
    /// Battery charge in [0, 1], only present on battery frames
    pub battery: Option<f32>,
    /// Whether the raw counter byte carried the 0xE9 sync marker
    pub sync: bool,
    /// Raw gyro X byte
    pub gyro_x: u8,
    /// Raw gyro Y byte
    pub gyro_y: u8,
    /// 14-bit levels in [`Channel`] order, baseline around 4096
    pub channels: [f64; CHANNEL_COUNT],
    /// Contact-quality slot for this cycle, if any
    pub contact_quality: Option<ContactQualitySample>,
    /// When the frame was decoded
    pub timestamp: DateTime<Utc>,
}

impl DataPacket {
    /// Level of a single channel.
    pub fn channel(&self, channel: Channel) -> f64 {
        self.channels[channel.index()]
    }

    /// Channel whose contact quality this frame carries.
    pub fn cq_channel(&self) -> Option<Channel> {
        self.contact_quality.map(|cq| cq.channel)
    }

    /// Raw contact-quality value carried by this frame.
    pub fn cq_value(&self) -> Option<f64> {
        self.contact_quality.map(|cq| cq.value)
    }

    /// Whether this is a battery frame.
    pub fn is_battery_frame(&self) -> bool {
        self.counter == BATTERY_COUNTER
    }
}
