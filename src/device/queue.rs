//! FIFO handing decoded packets from the acquisition thread to pull consumers.

use crate::device::types::DataPacket;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};

/// Thread-safe packet FIFO.
///
/// Cloning yields another handle to the same queue. Unbounded by default; a
/// bounded queue drops its oldest packet to make room when full.
#[derive(Debug, Clone)]
pub struct PacketQueue {
    sender: Sender<DataPacket>,
    receiver: Receiver<DataPacket>,
}

impl PacketQueue {
    /// Create an unbounded queue.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Create a queue holding at most `capacity` packets (minimum 1).
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self { sender, receiver }
    }

    /// Create a queue from an optional capacity.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        match capacity {
            Some(capacity) => Self::bounded(capacity),
            None => Self::new(),
        }
    }

    /// Append a packet.
    ///
    /// Returns `true` if an older packet had to be discarded to make room.
    /// A full queue is retried once before evicting. A consumer popping in
    /// the same instant can still make the eviction unnecessary; the evicted
    /// packet is then lost but always reported.
    pub fn push(&self, packet: DataPacket) -> bool {
        let mut packet = packet;
        let mut dropped = false;
        let mut retried = false;
        loop {
            match self.sender.try_send(packet) {
                Ok(()) => return dropped,
                Err(TrySendError::Full(rejected)) if !retried => {
                    packet = rejected;
                    retried = true;
                }
                Err(TrySendError::Full(rejected)) => {
                    packet = rejected;
                    dropped |= self.receiver.try_recv().is_ok();
                }
                // Both ends live in `self`, so the channel cannot disconnect.
                Err(TrySendError::Disconnected(_)) => return dropped,
            }
        }
    }

    /// Pop the oldest packet without blocking.
    pub fn try_pop(&self) -> Option<DataPacket> {
        self.receiver.try_recv().ok()
    }

    /// Iterate over the packets queued right now without blocking.
    pub fn drain(&self) -> impl Iterator<Item = DataPacket> + '_ {
        self.receiver.try_iter()
    }

    /// Discard every queued packet, returning how many were dropped.
    pub fn clear(&self) -> usize {
        self.drain().count()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}
