//! Packet subscribers invoked by the acquisition thread.
//!
//! Subscribers run synchronously, in registration order, once per decoded
//! packet. Each invocation is isolated: an error or a panic is logged and
//! counted, and the remaining subscribers still see the packet.

use crate::device::types::DataPacket;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Errors raised by subscribers and the registry.
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("subscriber is not registered")]
    NotFound,
    #[error("subscriber failed: {0}")]
    Failed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Receives every decoded packet.
///
/// Implementations run on the acquisition thread and should return quickly;
/// use [`ChannelSubscriber`] to move slow work elsewhere.
pub trait PacketSubscriber: Send + Sync {
    fn on_packet(&self, packet: &DataPacket) -> Result<(), SubscriberError>;

    /// Name used when reporting failures.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> PacketSubscriber for F
where
    F: Fn(&DataPacket) + Send + Sync,
{
    fn on_packet(&self, packet: &DataPacket) -> Result<(), SubscriberError> {
        self(packet);
        Ok(())
    }
}

/// Ordered list of packet subscribers. Clones share the same list.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    entries: Arc<RwLock<Vec<Arc<dyn PacketSubscriber>>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscriber. The same subscriber may be registered more than once.
    pub fn subscribe(&self, subscriber: Arc<dyn PacketSubscriber>) {
        self.entries.write().push(subscriber);
    }

    /// Remove the first registration of `subscriber`, compared by identity.
    pub fn unsubscribe<S>(&self, subscriber: &Arc<S>) -> Result<(), SubscriberError>
    where
        S: PacketSubscriber + ?Sized,
    {
        let target = Arc::as_ptr(subscriber) as *const ();
        let mut entries = self.entries.write();
        let position = entries
            .iter()
            .position(|entry| Arc::as_ptr(entry) as *const () == target)
            .ok_or(SubscriberError::NotFound)?;
        entries.remove(position);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove every subscriber.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Invoke every subscriber with `packet`, returning the number of failures.
    pub fn dispatch(&self, packet: &DataPacket) -> usize {
        // Snapshot so subscribers may (un)subscribe from inside a callback.
        let subscribers: Vec<Arc<dyn PacketSubscriber>> = self.entries.read().clone();

        let mut failures = 0;
        for subscriber in &subscribers {
            match panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_packet(packet))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::warn!(subscriber = subscriber.name(), "Subscriber failed: {}", e);
                }
                Err(payload) => {
                    failures += 1;
                    tracing::warn!(
                        subscriber = subscriber.name(),
                        "Subscriber panicked: {}",
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        failures
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("len", &self.len())
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Forwards packets into a bounded channel so a slow consumer never stalls
/// acquisition.
///
/// When the channel is full the newest packet is rejected and counted in
/// [`ChannelSubscriber::dropped`].
#[derive(Debug)]
pub struct ChannelSubscriber {
    sender: Sender<DataPacket>,
    dropped: AtomicU64,
}

impl ChannelSubscriber {
    /// Create a subscriber and the receiving end of its channel.
    pub fn bounded(capacity: usize) -> (Arc<Self>, Receiver<DataPacket>) {
        let (sender, receiver) = bounded(capacity.max(1));
        let subscriber = Arc::new(Self {
            sender,
            dropped: AtomicU64::new(0),
        });
        (subscriber, receiver)
    }

    /// Packets rejected because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl PacketSubscriber for ChannelSubscriber {
    fn on_packet(&self, packet: &DataPacket) -> Result<(), SubscriberError> {
        match self.sender.try_send(packet.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "channel"
    }
}
