//! Notifications published to the presentation layer.
//!
//! This module provides:
//! - [`SyncEvent`], the messages produced by the engine
//! - [`EventEmitter`] trait for publishing them without knowing the transport
//! - [`BroadcastEventBridge`] for fan-out over a `tokio::sync::broadcast` channel

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::{Deserialize, Serialize};

use crate::sonos::types::{Group, GroupChange, GroupId, GroupUpdate, PlayState, Track};
use crate::state::GroupStateMap;

/// Messages sent to the presentation layer.
///
/// A snapshot replaces the receiver's copy wholesale. Every other variant
/// changes one dimension of one group and must be ignored by receivers that
/// do not know the group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEvent {
    /// Full state of every group after a (re)synchronization.
    GroupsSnapshot {
        groups: GroupStateMap,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    TrackChanged {
        group: Group,
        track: Track,
        timestamp: u64,
    },
    VolumeChanged {
        group: Group,
        volume: u8,
        timestamp: u64,
    },
    MuteChanged {
        group: Group,
        #[serde(rename = "isMuted")]
        is_muted: bool,
        timestamp: u64,
    },
    PlayStateChanged {
        group: Group,
        state: PlayState,
        timestamp: u64,
    },
}

impl SyncEvent {
    pub fn snapshot(groups: GroupStateMap, timestamp: u64) -> Self {
        Self::GroupsSnapshot { groups, timestamp }
    }

    /// Builds the message for an incremental update.
    pub fn from_update(update: &GroupUpdate, timestamp: u64) -> Self {
        let group = update.group.clone();
        match &update.change {
            GroupChange::Track(track) => Self::TrackChanged {
                group,
                track: track.clone(),
                timestamp,
            },
            GroupChange::Volume(volume) => Self::VolumeChanged {
                group,
                volume: *volume,
                timestamp,
            },
            GroupChange::Mute(is_muted) => Self::MuteChanged {
                group,
                is_muted: *is_muted,
                timestamp,
            },
            GroupChange::PlayState(state) => Self::PlayStateChanged {
                group,
                state: *state,
                timestamp,
            },
        }
    }

    /// Recovers the incremental update carried by this message.
    ///
    /// Returns `None` for snapshots.
    pub fn as_update(&self) -> Option<GroupUpdate> {
        let (group, change) = match self {
            Self::GroupsSnapshot { .. } => return None,
            Self::TrackChanged { group, track, .. } => (group, GroupChange::Track(track.clone())),
            Self::VolumeChanged { group, volume, .. } => (group, GroupChange::Volume(*volume)),
            Self::MuteChanged {
                group, is_muted, ..
            } => (group, GroupChange::Mute(*is_muted)),
            Self::PlayStateChanged { group, state, .. } => {
                (group, GroupChange::PlayState(*state))
            }
        };
        Some(GroupUpdate::new(group.clone(), change))
    }

    /// Group the message refers to; `None` for snapshots.
    pub fn group_id(&self) -> Option<&GroupId> {
        match self {
            Self::GroupsSnapshot { .. } => None,
            Self::TrackChanged { group, .. }
            | Self::VolumeChanged { group, .. }
            | Self::MuteChanged { group, .. }
            | Self::PlayStateChanged { group, .. } => Some(&group.id),
        }
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(self, Self::GroupsSnapshot { .. })
    }
}
