//! Event emitter abstraction for decoupling the engine from transport.
//!
//! The engine depends on the [`EventEmitter`] trait rather than a concrete
//! channel, enabling testing and alternative transports.

use super::SyncEvent;
use crate::sonos::types::GroupUpdate;
use crate::state::GroupStateMap;
use crate::utils::now_millis;

/// Trait for publishing engine notifications without knowledge of transport.
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl MyService {
///     fn on_volume(&self, group: Group, volume: u8) {
///         self.emitter
///             .publish_update(&GroupUpdate::new(group, GroupChange::Volume(volume)));
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Delivers one message.
    fn emit(&self, event: SyncEvent);

    /// Sends the entire group-state map.
    fn publish_snapshot(&self, groups: &GroupStateMap) {
        self.emit(SyncEvent::snapshot(groups.clone(), now_millis()));
    }

    /// Sends one incremental change.
    fn publish_update(&self, update: &GroupUpdate) {
        self.emit(SyncEvent::from_update(update, now_millis()));
    }
}

/// No-op emitter for headless use or testing.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit(&self, _event: SyncEvent) {
        // No-op
    }
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit(&self, event: SyncEvent) {
        match &event {
            SyncEvent::GroupsSnapshot { groups, .. } => {
                tracing::debug!(groups = groups.len(), "groups_snapshot");
            }
            _ => tracing::debug!(?event, "group_update"),
        }
    }
}
