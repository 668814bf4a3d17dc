//! Sonos groups, their state, and the device capability boundary.
//!
//! # Module Structure
//!
//! - `types` - Domain types for groups, tracks and group state
//! - `traits` - Capability provider traits consumed by the engine
//! - `backoff` - Quadratic retry schedule for discovery
//! - `subscription` - Cancellable handles for listeners and timers
//! - `memory` - In-memory capability provider

pub mod backoff;
pub mod memory;
pub mod subscription;
pub mod traits;
pub mod types;

// Re-export domain types
pub use types::{
    Dimension, Group, GroupChange, GroupId, GroupState, GroupUpdate, PlayState, Track,
};

// Re-export trait abstractions
pub use traits::{CapabilityProvider, DeviceDiscovery, DeviceHandle, GroupHandle, TopologyListener};

// Re-export concrete implementation
pub use memory::{HouseholdFixture, InMemoryProvider};
