//! Trait abstractions for the device capability provider.
//!
//! The engine never talks to speakers directly. Discovery, group listing,
//! state queries and event subscriptions all go through these traits, which
//! keeps the engine independent of the control protocol and lets tests
//! substitute an in-memory provider.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::SyncResult;
use crate::sonos::types::{Dimension, Group, GroupChange, PlayState, Track};

/// Finds a device on the network that can answer topology queries.
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// Discovers a device.
    ///
    /// Fails with [`SyncError::Discovery`](crate::error::SyncError::Discovery).
    async fn discover(&self) -> SyncResult<Arc<dyn DeviceHandle>>;
}

/// A discovered device, used to enumerate the household's groups.
#[async_trait]
pub trait DeviceHandle: Send + Sync {
    /// Address of the device, for logging.
    fn host(&self) -> &str;

    /// Lists all zone groups.
    ///
    /// Fails with [`SyncError::Enumeration`](crate::error::SyncError::Enumeration).
    async fn get_all_groups(&self) -> SyncResult<Vec<Group>>;

    /// Returns a handle to the coordinator of `group`.
    fn coordinator(&self, group: &Group) -> Arc<dyn GroupHandle>;
}

/// Queries and events for one group, addressed through its coordinator.
///
/// Every query is independently failable.
#[async_trait]
pub trait GroupHandle: Send + Sync {
    async fn current_track(&self) -> SyncResult<Track>;

    async fn play_state(&self) -> SyncResult<PlayState>;

    /// Group volume (0-100).
    async fn volume(&self) -> SyncResult<u8>;

    async fn muted(&self) -> SyncResult<bool>;

    /// Subscribes to change events for one dimension.
    ///
    /// The subscription lasts as long as the stream is alive; dropping the
    /// stream releases it.
    fn listen(&self, dimension: Dimension) -> BoxStream<'static, GroupChange>;
}

/// Household-wide topology subscription.
#[async_trait]
pub trait TopologyListener: Send + Sync {
    /// Starts receiving topology events through `device`.
    async fn subscribe_to(&self, device: Arc<dyn DeviceHandle>) -> SyncResult<()>;

    /// Releases every subscription held by the listener.
    ///
    /// Fails with
    /// [`SyncError::SubscriptionTeardown`](crate::error::SyncError::SubscriptionTeardown).
    async fn stop_listener(&self) -> SyncResult<()>;

    fn is_listening(&self) -> bool;

    /// Stream of `ZonesChanged` signals.
    fn zone_changes(&self) -> BoxStream<'static, ()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Combined Traits (for trait objects)
// ─────────────────────────────────────────────────────────────────────────────

/// Combined trait for everything the engine needs from a provider.
#[async_trait]
pub trait CapabilityProvider: DeviceDiscovery + TopologyListener {}

/// Blanket implementation for any type implementing both traits.
impl<T: DeviceDiscovery + TopologyListener> CapabilityProvider for T {}
