//! Aggregate headset state updated by the acquisition thread.

use crate::device::types::{Channel, DataPacket, CHANNEL_COUNT};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Latest values seen on the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Last reported battery charge in [0, 1]
    pub battery: Option<f32>,
    /// Last gyro X/Y bytes
    pub gyro: Option<(u8, u8)>,
    /// Last raw contact-quality value per channel, in [`Channel`] order
    pub contact_quality: [f64; CHANNEL_COUNT],
    /// Packets per second over the last 128 packets
    pub packet_rate: f64,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            battery: None,
            gyro: None,
            contact_quality: [0.0; CHANNEL_COUNT],
            packet_rate: 0.0,
        }
    }
}

impl DeviceState {
    /// Fold a decoded packet into the state.
    ///
    /// Frames without a battery reading keep the last known level.
    pub fn apply(&mut self, packet: &DataPacket) {
        if let Some(battery) = packet.battery {
            self.battery = Some(battery);
        }
        self.gyro = Some((packet.gyro_x, packet.gyro_y));
        if let Some(cq) = packet.contact_quality {
            self.contact_quality[cq.channel.index()] = cq.value;
        }
    }

    pub fn contact_resistance(&self, channel: Channel) -> ContactResistance {
        contact_resistance(self.contact_quality[channel.index()])
    }
}

/// Estimated electrode contact resistance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactResistance {
    /// Resistance in kOhm, absent when there is no contact
    pub kohm: Option<f64>,
    /// Display label
    pub label: String,
}

const NO_CONTACT_BELOW: f64 = 260.0;
const EXCELLENT_ABOVE: f64 = 1026.0;

/// Map a raw contact-quality value to an estimated resistance using an
/// empirical 4th-order polynomial.
pub fn contact_resistance(cq: f64) -> ContactResistance {
    if cq < NO_CONTACT_BELOW {
        return ContactResistance {
            kohm: None,
            label: "No contact".to_string(),
        };
    }
    if cq > EXCELLENT_ABOVE {
        return ContactResistance {
            kohm: Some(4.0),
            label: "Excellent".to_string(),
        };
    }

    let x = (cq - 673.5) / 315.6328;
    let r = -12.7629 * x.powi(4) - 31.3003 * x.powi(3) + 12.1686 * x.powi(2) - 0.4063 * x
        + 51.5679;
    ContactResistance {
        kohm: Some(r),
        label: format!("{r:.0} kOhm"),
    }
}

/// Device state shared between the acquisition thread and readers.
///
/// The acquisition thread is the only writer; readers get consistent
/// snapshots through short read locks.
#[derive(Debug, Clone, Default)]
pub struct SharedDeviceState {
    inner: Arc<RwLock<DeviceState>>,
}

impl SharedDeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the whole state.
    pub fn snapshot(&self) -> DeviceState {
        self.inner.read().clone()
    }

    pub fn battery(&self) -> Option<f32> {
        self.inner.read().battery
    }

    pub fn gyro(&self) -> Option<(u8, u8)> {
        self.inner.read().gyro
    }

    pub fn contact_quality(&self, channel: Channel) -> f64 {
        self.inner.read().contact_quality[channel.index()]
    }

    pub fn contact_resistance(&self, channel: Channel) -> ContactResistance {
        self.inner.read().contact_resistance(channel)
    }

    pub fn packet_rate(&self) -> f64 {
        self.inner.read().packet_rate
    }

    /// Battery text for status displays, e.g. `BATT: 75%`.
    pub fn battery_label(&self) -> String {
        match self.battery() {
            Some(level) => format!("BATT: {}%", (level * 100.0) as u32),
            None => "NO DATA".to_string(),
        }
    }

    /// Packet rate text for status displays, e.g. `128.0 S/sec`.
    pub fn rate_label(&self) -> String {
        let rate = self.packet_rate();
        if rate > 0.0 {
            format!("{rate:.1} S/sec")
        } else {
            "NO DATA".to_string()
        }
    }

    pub(crate) fn apply(&self, packet: &DataPacket) {
        self.inner.write().apply(packet);
    }

    pub(crate) fn set_packet_rate(&self, rate: f64) {
        self.inner.write().packet_rate = rate;
    }

    /// Forget everything learned from the stream.
    pub fn reset(&self) {
        *self.inner.write() = DeviceState::default();
    }
}
