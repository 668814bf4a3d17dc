//! Bridge implementation that maps engine notifications to broadcast transport.
//!
//! The [`BroadcastEventBridge`] lives at the boundary between the engine and
//! the presentation layer, fanning [`SyncEvent`]s out to every subscriber.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::SyncEvent;

/// Bridges engine notifications to a broadcast channel.
///
/// Also forwards to an optional external emitter that can be set after
/// construction, for consumers that are not channel based.
///
/// # Thread Safety
///
/// The bridge is `Send + Sync` and can be shared across async tasks.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<SyncEvent>,
    /// Optional external emitter
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0. [`SyncConfig::validate`](crate::state::SyncConfig::validate)
    /// rejects that value.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self::with_sender(tx)
    }

    /// Creates a new bridge wrapping an existing broadcast sender.
    pub fn with_sender(tx: broadcast::Sender<SyncEvent>) -> Self {
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an external emitter that receives every event as well.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

impl EventEmitter for BroadcastEventBridge {
    fn emit(&self, event: SyncEvent) {
        if let Some(ref emitter) = *self.external_emitter.read() {
            emitter.emit(event.clone());
        }
        if let Err(e) = self.tx.send(event) {
            log::trace!("[EventBridge] No broadcast receivers: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sonos::types::{Group, GroupChange, GroupId, GroupUpdate};
    use crate::state::GroupStateMap;
    use parking_lot::Mutex;

    struct RecordingEmitter(Mutex<Vec<SyncEvent>>);

    impl EventEmitter for RecordingEmitter {
        fn emit(&self, event: SyncEvent) {
            self.0.lock().push(event);
        }
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bridge = BroadcastEventBridge::new(16);
        let mut rx = bridge.subscribe();
        let group = Group {
            id: GroupId::new("g"),
            name: "Den".into(),
            member_names: vec![],
            host: "10.0.0.3".into(),
        };

        bridge.publish_snapshot(&GroupStateMap::new());
        bridge.publish_update(&GroupUpdate::new(group, GroupChange::Volume(12)));

        assert!(rx.recv().await.unwrap().is_snapshot());
        assert!(matches!(
            rx.recv().await.unwrap(),
            SyncEvent::VolumeChanged { volume: 12, .. }
        ));
    }

    #[test]
    fn emitting_without_receivers_is_harmless() {
        let bridge = BroadcastEventBridge::new(4);
        bridge.publish_snapshot(&GroupStateMap::new());
    }

    #[test]
    fn external_emitter_sees_every_event() {
        let bridge = BroadcastEventBridge::new(4);
        let recorder = Arc::new(RecordingEmitter(Mutex::new(Vec::new())));
        bridge.set_external_emitter(recorder.clone());

        bridge.publish_snapshot(&GroupStateMap::new());
        bridge.publish_snapshot(&GroupStateMap::new());

        assert_eq!(recorder.0.lock().len(), 2);
    }
}
