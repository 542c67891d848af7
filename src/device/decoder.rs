//! Bit-exact decoder for decrypted headset frames.
//!
//! Frame layout (plaintext, 32 bytes):
//!
//! | Bytes | Field |
//! |---|---|
//! | 0 | packet counter, or battery level when > 127 |
//! | 1..=28 | 14 channels + contact quality, 14-bit fields scattered per bit table |
//! | 29 | gyro X |
//! | 30 | gyro Y |
//!
//! Bit offsets in the tables are counted from byte 1, byte 0 being reserved for
//! the counter. Table entry 13 is the most significant bit of the level.

use crate::device::types::{
    Channel, ContactQualitySample, DataPacket, BATTERY_COUNTER, CHANNEL_COUNT, FRAME_LEN,
};
use chrono::Utc;

/// Number of bits in one level field.
pub const LEVEL_BITS: usize = 14;

/// Bit positions of one 14-bit field, least significant first.
pub type BitTable = [u16; LEVEL_BITS];

/// Per-channel bit tables, indexed by [`Channel::index`].
pub const CHANNEL_BITS: [BitTable; CHANNEL_COUNT] = [
    // F3
    [10, 11, 12, 13, 14, 15, 0, 1, 2, 3, 4, 5, 6, 7],
    // FC5
    [28, 29, 30, 31, 16, 17, 18, 19, 20, 21, 22, 23, 8, 9],
    // AF3
    [46, 47, 32, 33, 34, 35, 36, 37, 38, 39, 24, 25, 26, 27],
    // F7
    [48, 49, 50, 51, 52, 53, 54, 55, 40, 41, 42, 43, 44, 45],
    // T7
    [66, 67, 68, 69, 70, 71, 56, 57, 58, 59, 60, 61, 62, 63],
    // P7
    [84, 85, 86, 87, 72, 73, 74, 75, 76, 77, 78, 79, 64, 65],
    // O1
    [102, 103, 88, 89, 90, 91, 92, 93, 94, 95, 80, 81, 82, 83],
    // O2
    [140, 141, 142, 143, 128, 129, 130, 131, 132, 133, 134, 135, 120, 121],
    // P8
    [158, 159, 144, 145, 146, 147, 148, 149, 150, 151, 136, 137, 138, 139],
    // T8
    [160, 161, 162, 163, 164, 165, 166, 167, 152, 153, 154, 155, 156, 157],
    // F8
    [178, 179, 180, 181, 182, 183, 168, 169, 170, 171, 172, 173, 174, 175],
    // AF4
    [196, 197, 198, 199, 184, 185, 186, 187, 188, 189, 190, 191, 176, 177],
    // FC6
    [214, 215, 200, 201, 202, 203, 204, 205, 206, 207, 192, 193, 194, 195],
    // F4
    [216, 217, 218, 219, 220, 221, 222, 223, 208, 209, 210, 211, 212, 213],
];

/// Bit table shared by all contact-quality readings.
pub const CQ_BITS: BitTable = [119, 104, 105, 106, 107, 108, 109, 110, 111, 96, 97, 98, 99, 100];

/// Raw counter byte marking a sync frame.
pub const SYNC_MARKER: u8 = 0xE9;

const GYRO_X_BYTE: usize = 29;
const GYRO_Y_BYTE: usize = 30;

const BATTERY_EMPTY: f32 = 225.0;
const BATTERY_FULL: f32 = 248.0;

/// Errors raised by [`decode_frame`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame must be {expected} bytes, got {actual}")]
    FrameLength { expected: usize, actual: usize },
}

/// Value of absolute bit `bit` (offset by the counter byte).
#[inline]
pub fn extract_bit(frame: &[u8; FRAME_LEN], bit: u16) -> u16 {
    let byte = usize::from(bit / 8) + 1;
    let shift = bit % 8;
    u16::from((frame[byte] >> shift) & 1)
}

/// Assemble a 14-bit level from its bit table, `table[13]` being the MSB.
pub fn extract_level(frame: &[u8; FRAME_LEN], table: &BitTable) -> u16 {
    table
        .iter()
        .rev()
        .fold(0u16, |level, &bit| (level << 1) | extract_bit(frame, bit))
}

/// Battery charge encoded in a raw counter byte > 127.
pub fn battery_level(raw_counter: u8) -> Option<f32> {
    if raw_counter > 127 {
        let level = (f32::from(raw_counter) - BATTERY_EMPTY) / (BATTERY_FULL - BATTERY_EMPTY);
        Some(level.clamp(0.0, 1.0))
    } else {
        None
    }
}

/// Decode one decrypted frame.
pub fn decode_frame(plain: &[u8]) -> Result<DataPacket, DecodeError> {
    let frame: &[u8; FRAME_LEN] = plain.try_into().map_err(|_| DecodeError::FrameLength {
        expected: FRAME_LEN,
        actual: plain.len(),
    })?;

    let raw_counter = frame[0];
    let battery = battery_level(raw_counter);
    let counter = if battery.is_some() {
        BATTERY_COUNTER
    } else {
        raw_counter
    };

    let mut channels = [0.0; CHANNEL_COUNT];
    for (level, table) in channels.iter_mut().zip(CHANNEL_BITS.iter()) {
        *level = f64::from(extract_level(frame, table));
    }

    let contact_quality =
        Channel::from_index(usize::from(counter)).map(|channel| ContactQualitySample {
            channel,
            value: f64::from(extract_level(frame, &CQ_BITS)),
        });

    Ok(DataPacket {
        counter,
        battery,
        sync: raw_counter == SYNC_MARKER,
        gyro_x: frame[GYRO_X_BYTE],
        gyro_y: frame[GYRO_Y_BYTE],
        channels,
        contact_quality,
        timestamp: Utc::now(),
    })
}

/// Build a plaintext frame carrying the given fields.
///
/// Inverse of [`decode_frame`] for levels that fit in 14 bits; used to drive
/// simulated headsets and tests.
pub fn encode_frame(
    counter: u8,
    gyro: (u8, u8),
    channels: &[u16; CHANNEL_COUNT],
    cq: u16,
) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = counter;
    frame[GYRO_X_BYTE] = gyro.0;
    frame[GYRO_Y_BYTE] = gyro.1;
    for (level, table) in channels.iter().zip(CHANNEL_BITS.iter()) {
        insert_level(&mut frame, table, *level);
    }
    if usize::from(counter) < CHANNEL_COUNT {
        insert_level(&mut frame, &CQ_BITS, cq);
    }
    frame
}

fn insert_level(frame: &mut [u8; FRAME_LEN], table: &BitTable, level: u16) {
    for (i, &bit) in table.iter().enumerate() {
        let byte = usize::from(bit / 8) + 1;
        let mask = 1u8 << (bit % 8);
        if (level >> i) & 1 == 1 {
            frame[byte] |= mask;
        } else {
            frame[byte] &= !mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_byte_pattern() {
        // Byte 1 holds absolute bits 0..=7, which are F3 table entries 6..=13.
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = 20;
        frame[1] = 0xFF;

        let packet = decode_frame(&frame).unwrap();
        assert_eq!(packet.channel(Channel::F3), 16320.0);
        for channel in &Channel::ALL[1..] {
            assert_eq!(packet.channel(*channel), 0.0, "{channel}");
        }
        assert!(packet.contact_quality.is_none());
    }

    #[test]
    fn test_msb_comes_from_last_table_entry() {
        // FC5 entry 13 is bit 9: byte 2, bit 1.
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = 50;
        frame[2] = 0b0000_0010;

        let packet = decode_frame(&frame).unwrap();
        assert_eq!(packet.channel(Channel::FC5), 8192.0);
        // F3 entries 0 and 1 are bits 10 and 11; only bit 9 is set so F3 stays 0.
        assert_eq!(packet.channel(Channel::F3), 0.0);
    }

    #[test]
    fn test_golden_frame() {
        let mut frame: [u8; FRAME_LEN] = std::array::from_fn(|i| (i * 37 + 11) as u8);
        frame[0] = 7;

        let packet = decode_frame(&frame).unwrap();
        let expected = [
            (Channel::F3, 3093.0),
            (Channel::FC5, 6057.0),
            (Channel::AF3, 16147.0),
            (Channel::F7, 10510.0),
            (Channel::T7, 3286.0),
            (Channel::P7, 2010.0),
            (Channel::O1, 2847.0),
            (Channel::O2, 14346.0),
            (Channel::P8, 5931.0),
            (Channel::T8, 12052.0),
            (Channel::F8, 3671.0),
            (Channel::AF4, 10298.0),
            (Channel::FC6, 9015.0),
            (Channel::F4, 12823.0),
        ];
        for (channel, level) in expected {
            assert_eq!(packet.channel(channel), level, "{channel}");
        }
        assert_eq!(packet.cq_channel(), Some(Channel::O2));
        assert_eq!(packet.cq_value(), Some(6178.0));
        assert_eq!(packet.gyro_x, frame[29]);
        assert_eq!(packet.gyro_y, frame[30]);
    }

    #[test]
    fn test_all_channels_and_cq() {
        let levels: [u16; CHANNEL_COUNT] = std::array::from_fn(|i| 4096 + 37 * i as u16);
        let frame = encode_frame(5, (105, 110), &levels, 900);

        let packet = decode_frame(&frame).unwrap();
        for (i, channel) in Channel::ALL.iter().enumerate() {
            assert_eq!(packet.channel(*channel), f64::from(levels[i]));
        }
        assert_eq!(packet.counter, 5);
        assert_eq!(packet.gyro_x, 105);
        assert_eq!(packet.gyro_y, 110);
        assert_eq!(packet.cq_channel(), Some(Channel::P7));
        assert_eq!(packet.cq_value(), Some(900.0));
    }

    #[test]
    fn test_cq_only_for_first_fourteen_counters() {
        let levels = [4096u16; CHANNEL_COUNT];

        let packet = decode_frame(&encode_frame(13, (0, 0), &levels, 321)).unwrap();
        assert_eq!(packet.cq_channel(), Some(Channel::F4));
        assert_eq!(packet.cq_value(), Some(321.0));

        let packet = decode_frame(&encode_frame(14, (0, 0), &levels, 321)).unwrap();
        assert!(packet.contact_quality.is_none());
    }

    #[test]
    fn test_battery_mapping() {
        assert_eq!(battery_level(225), Some(0.0));
        assert_eq!(battery_level(248), Some(1.0));
        assert_eq!(battery_level(254), Some(1.0));
        assert_eq!(battery_level(128), Some(0.0));
        assert_eq!(battery_level(100), None);

        let mut frame = [0u8; FRAME_LEN];
        frame[0] = 236;
        let packet = decode_frame(&frame).unwrap();
        assert_eq!(packet.counter, BATTERY_COUNTER);
        assert!(packet.is_battery_frame());
        assert!((packet.battery.unwrap() - 11.0 / 23.0).abs() < 1e-6);
        assert!(packet.contact_quality.is_none());
    }

    #[test]
    fn test_sync_marker() {
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = SYNC_MARKER;
        let packet = decode_frame(&frame).unwrap();
        assert!(packet.sync);
        assert_eq!(packet.counter, BATTERY_COUNTER);

        frame[0] = 3;
        assert!(!decode_frame(&frame).unwrap().sync);
    }

    #[test]
    fn test_short_frame_rejected() {
        let err = decode_frame(&[0u8; 16]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::FrameLength {
                expected: FRAME_LEN,
                actual: 16
            }
        );
    }

    #[test]
    fn test_tables_stay_inside_frame() {
        for table in CHANNEL_BITS.iter().chain(std::iter::once(&CQ_BITS)) {
            for &bit in table {
                assert!(usize::from(bit / 8) + 1 < GYRO_X_BYTE);
            }
        }
    }
}
