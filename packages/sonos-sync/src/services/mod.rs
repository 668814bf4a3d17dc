//! Application services layer.
//!
//! This module contains the discovery and synchronization services that
//! orchestrate between the capability provider (sonos/) and the event
//! emitter (events/).

pub mod change_dispatcher;
pub mod discovery_manager;
pub mod group_synchronizer;
pub mod state_owner;
pub mod sync_engine;

pub use change_dispatcher::{ChangeDispatcher, DispatchMode, PollTracker};
pub use discovery_manager::{DiscoveryManager, DiscoveryPhase};
pub use group_synchronizer::synchronize;
pub use state_owner::StateHandle;
pub use sync_engine::SyncEngine;
