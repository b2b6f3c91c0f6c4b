use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::models::audio_models::{DeviceEvent, Endpoint, SourceKind};
use crate::models::error::CaptureError;

/// Enumerates audio endpoints and reports topology changes.
///
/// The recording pipeline never consumes device events itself. A control
/// layer subscribes and decides whether to rebuild a session on a new device.
pub trait DeviceDirectory: Send + Sync {
    fn list_endpoints(&self, kind: SourceKind) -> Result<Vec<Endpoint>, CaptureError>;

    fn default_endpoint(&self, kind: SourceKind) -> Result<Endpoint, CaptureError>;

    /// A new receiver that sees every event published after this call.
    fn subscribe(&self) -> Receiver<DeviceEvent>;
}

/// Fans device events out to any number of subscribers.
///
/// Subscribers whose receiver has been dropped are pruned on the next publish.
#[derive(Debug, Default)]
pub struct DeviceEventBus {
    subscribers: Mutex<Vec<Sender<DeviceEvent>>>,
}

impl DeviceEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<DeviceEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber. Never blocks.
    pub fn publish(&self, event: DeviceEvent) {
        let mut subscribers = self.subscribers.lock();
        log::debug!("device event {:?} -> {} subscribers", event, subscribers.len());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
