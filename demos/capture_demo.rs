//! Demonstration of the acquisition pipeline against a simulated headset.
//!
//! This example shows how to:
//! 1. Derive the frame key from a headset serial number
//! 2. Feed encrypted frames to a reader through a replay source
//! 3. Receive packets through a channel subscriber
//! 4. Pull the packet queue into the rolling signal window
//! 5. Read battery, gyro and contact quality from the device state
//!
//! Run with: cargo run --example capture_demo
//!
//! No hardware is needed.

use std::sync::Arc;
use std::time::Duration;

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Block};
use wave_rider::{
    core::SignalRingBuffer,
    device::{
        derive_key, encode_frame, Channel, ChannelSubscriber, FrameCipher, FrameSource,
        HeadsetReader, RawFrame, ReaderConfig, ReaderStatus, ReplaySource, CHANNEL_COUNT,
    },
    recording::{create_shared_stats, format_packet_line},
};

const SERIAL: &str = "SN20120229000254";
const FRAMES: usize = 512;

fn main() {
    println!("Wave Rider - Capture Demo");
    println!("=========================");
    println!();

    let key = match derive_key(SERIAL) {
        Ok(key) => key,
        Err(e) => {
            eprintln!("Error deriving key: {e}");
            return;
        }
    };
    println!("Serial: {SERIAL}");
    println!("Key:    {key:02x?}");
    println!();

    let frames = simulated_frames(&Aes128::new(&key.into()), FRAMES);
    let stats = create_shared_stats();
    let mut reader = HeadsetReader::with_opener(
        ReaderConfig {
            poll_interval: Duration::from_millis(10),
            ..ReaderConfig::default()
        },
        FrameCipher::new(&key),
        Arc::new(move || Ok(Box::new(ReplaySource::new(frames.clone())) as Box<dyn FrameSource>)),
    )
    .with_stats(stats.clone());

    let (subscriber, packets) = ChannelSubscriber::bounded(FRAMES);
    reader.subscribers().subscribe(subscriber.clone());

    let mut buffer = match SignalRingBuffer::new(128, 8000.0) {
        Ok(buffer) => buffer,
        Err(e) => {
            eprintln!("Error creating buffer: {e}");
            return;
        }
    };

    println!("Replaying {FRAMES} simulated frames...");
    reader.start();

    // The replay source ends like an unplugged device.
    while reader.status() != ReaderStatus::Stopped || !reader.queue().is_empty() {
        buffer.pull(reader.queue());
        std::thread::sleep(Duration::from_millis(10));
    }
    reader.stop();

    println!();
    println!("First packets seen by the subscriber:");
    for packet in packets.try_iter().take(3) {
        println!("  {}", format_packet_line(&packet));
    }

    let window = buffer.window();
    println!();
    println!("Window of {} samples, per-channel mean:", window.len());
    for channel in Channel::ALL {
        let mean = window.channel(channel.index()).sum::<f64>() / window.len() as f64;
        println!("  {:<4} {:>8.1}", channel.name(), mean);
    }

    let state = reader.state();
    println!();
    println!("{}", state.battery_label());
    if let Some((x, y)) = state.gyro() {
        println!("Gyro: X={x} Y={y}");
    }
    println!("Contact quality:");
    for channel in Channel::ALL {
        println!("  {:<4} {}", channel.name(), state.contact_resistance(channel).label);
    }

    println!();
    println!("Subscriber drops: {}", subscriber.dropped());
    println!("{}", stats.summary());
}

/// Encrypted frames with a slow sine on every channel and a full counter cycle.
fn simulated_frames(aes: &Aes128, count: usize) -> Vec<Option<RawFrame>> {
    (0..count)
        .map(|i| {
            let counter = (i % 129) as u8;
            let levels: [u16; CHANNEL_COUNT] = std::array::from_fn(|c| {
                let phase = (i as f64 / 32.0) + c as f64;
                (8192.0 + 200.0 * phase.sin()) as u16
            });
            let cq = if counter == 128 { 0 } else { 700 + counter as u16 };
            // Counter 128 is a battery frame; the low bits carry the charge.
            let counter_byte = if counter == 128 { 0xF0 } else { counter };

            let mut frame = encode_frame(counter_byte, (105, 99), &levels, cq);
            for block in frame.chunks_exact_mut(16) {
                let mut b = Block::clone_from_slice(block);
                aes.encrypt_block(&mut b);
                block.copy_from_slice(&b);
            }
            Some(frame)
        })
        .collect()
}
