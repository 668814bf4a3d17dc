//! Sonos Sync - group discovery and synchronization engine.
//!
//! This crate discovers the zone groups of a Sonos household, takes an
//! initial snapshot of each group's playback state (track, volume, mute,
//! play state) and keeps it current by following device events or by
//! polling. Snapshots and per-dimension changes are published to a
//! presentation layer through an [`EventEmitter`](events::EventEmitter).
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`runtime`]: Task spawning abstraction for async runtime independence
//! - [`events`]: Messages for the presentation layer and their transport
//! - [`state`]: Engine configuration and the group-state map
//! - [`sonos`]: Domain types and the device capability boundary
//! - [`services`]: Discovery, synchronization and change dispatch
//! - [`presentation`]: Presentation-side mirror of the group map
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! - [`CapabilityProvider`](sonos::CapabilityProvider): Discovery, group
//!   queries and event subscriptions against devices
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Publishing engine messages
//!
//! [`InMemoryProvider`](sonos::InMemoryProvider) implements the provider
//! traits for tests and for replaying a household from a fixture file.

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod events;
pub mod presentation;
pub mod runtime;
pub mod services;
pub mod sonos;
pub mod state;
pub mod utils;

// Re-export commonly used types at the crate root
pub use error::{ErrorCode, SyncError, SyncResult};
pub use events::{
    BroadcastEventBridge, EventEmitter, LoggingEventEmitter, NoopEventEmitter, SyncEvent,
};
pub use presentation::{GroupView, NowPlaying, RowMetadata, SourceOverride, ViewOptions};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use services::{DiscoveryPhase, DispatchMode, SyncEngine};
pub use state::{GroupStateMap, SyncConfig};
pub use utils::now_millis;

// Re-export Sonos types
pub use sonos::{
    CapabilityProvider, Dimension, Group, GroupChange, GroupId, GroupState, GroupUpdate,
    HouseholdFixture, InMemoryProvider, PlayState, Track,
};
