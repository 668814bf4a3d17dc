//! Presentation-side mirror of the group-state map.
//!
//! [`GroupView`] consumes the messages published by the engine and keeps
//! its own copy of the map, exactly as a display would: snapshots replace
//! the copy, updates for unknown groups are ignored, and every other update
//! merges one dimension.

use serde::{Deserialize, Serialize};

use crate::events::SyncEvent;
use crate::sonos::types::{GroupState, Track};
use crate::state::GroupStateMap;

/// Replacement metadata for a well-known source URI (e.g. a line-in stream).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceOverride {
    /// Track URI the override applies to.
    pub uri: String,
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default, rename = "albumArtURI")]
    pub album_art_uri: Option<String>,
}

impl SourceOverride {
    fn matches(&self, track: &Track) -> bool {
        track.uri.as_deref() == Some(self.uri.as_str())
    }

    fn apply(&self, track: &Track) -> Track {
        Track {
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
            album_art_uri: self.album_art_uri.clone(),
            ..track.clone()
        }
    }
}

/// How groups are presented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ViewOptions {
    /// Show the group name, volume and duration line.
    pub show_metadata: bool,
    /// Use the joined member names instead of the group name.
    pub show_full_group_name: bool,
    pub show_artist: bool,
    pub show_album: bool,
    pub source_overrides: Vec<SourceOverride>,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            show_metadata: true,
            show_full_group_name: false,
            show_artist: true,
            show_album: true,
            source_overrides: Vec::new(),
        }
    }
}

/// Group name, volume and duration shown under a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowMetadata {
    pub group_name: String,
    pub volume: u8,
    pub is_muted: bool,
    /// Track length as `m:ss`.
    pub duration: String,
}

/// One row of the "now playing" list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    pub track: Track,
    /// Artist and album, filtered by the view options.
    pub details: Vec<String>,
    /// `None` when metadata is switched off.
    pub metadata: Option<RowMetadata>,
}

/// Local copy of the group-state map maintained from engine messages.
#[derive(Debug, Default)]
pub struct GroupView {
    options: ViewOptions,
    groups: GroupStateMap,
}

impl GroupView {
    pub fn new(options: ViewOptions) -> Self {
        Self {
            options,
            groups: GroupStateMap::new(),
        }
    }

    /// Applies one message. Returns false if it was ignored.
    pub fn apply(&mut self, event: &SyncEvent) -> bool {
        match event {
            SyncEvent::GroupsSnapshot { groups, .. } => {
                self.groups = groups.clone();
                true
            }
            other => match other.as_update() {
                Some(update) => self.groups.apply(&update),
                None => false,
            },
        }
    }

    pub fn groups(&self) -> &GroupStateMap {
        &self.groups
    }

    /// True if any group is playing a track.
    pub fn header_visible(&self) -> bool {
        self.groups.values().any(GroupState::is_playing_track)
    }

    /// Groups that are playing a track, with overrides applied.
    pub fn now_playing(&self) -> Vec<NowPlaying> {
        self.groups
            .values()
            .filter_map(|state| {
                let track = state.track.as_ref().filter(|_| state.is_playing_track())?;
                Some(self.row(state, track))
            })
            .collect()
    }

    fn row(&self, state: &GroupState, track: &Track) -> NowPlaying {
        let track = self
            .options
            .source_overrides
            .iter()
            .find(|o| o.matches(track))
            .map(|o| o.apply(track))
            .unwrap_or_else(|| track.clone());

        let mut details = Vec::new();
        if self.options.show_artist {
            details.extend(track.artist.clone());
        }
        if self.options.show_album {
            details.extend(track.album.clone());
        }

        let metadata = self.options.show_metadata.then(|| RowMetadata {
            group_name: state.group.display_name(self.options.show_full_group_name),
            volume: state.volume,
            is_muted: state.is_muted,
            duration: track.duration_label(),
        });

        NowPlaying {
            track,
            details,
            metadata,
        }
    }
}
