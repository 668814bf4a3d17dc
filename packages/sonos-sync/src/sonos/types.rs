//! Domain types for Sonos groups and their playback state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stable identifier of a zone group (e.g. `RINCON_xxx:123`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A zone group: one or more speakers playing as a single unit.
///
/// Groups are never patched in place. A topology change produces a fresh
/// set of groups that replaces the previous one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Unique group identifier.
    pub id: GroupId,
    /// Display name of the group.
    pub name: String,
    /// Room names of the group members, in topology order.
    #[serde(default)]
    pub member_names: Vec<String>,
    /// Address of the group coordinator.
    pub host: String,
}

impl Group {
    /// Returns the member names joined with `" + "`.
    ///
    /// Falls back to the group name when the member list is empty.
    pub fn full_name(&self) -> String {
        if self.member_names.is_empty() {
            return self.name.clone();
        }
        self.member_names.join(" + ")
    }

    /// Returns the name to show for this group.
    pub fn display_name(&self, full: bool) -> String {
        if full {
            self.full_name()
        } else {
            self.name.clone()
        }
    }
}

/// Currently playing media on a group coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(
        default,
        rename = "albumArtURI",
        skip_serializing_if = "Option::is_none"
    )]
    pub album_art_uri: Option<String>,
    /// Track length in seconds.
    #[serde(default)]
    pub duration: u64,
    /// Source locator of the media.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl Track {
    /// Returns true if both tracks have the same title and artist.
    ///
    /// Album, artwork and position differences do not count as a new song.
    pub fn is_same_song(&self, other: &Track) -> bool {
        self.title == other.title && self.artist == other.artist
    }

    /// Formats the duration as `m:ss`.
    pub fn duration_label(&self) -> String {
        format!("{}:{:02}", self.duration / 60, self.duration % 60)
    }
}

/// Transport state of a group coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
    Playing,
    Paused,
    Stopped,
    Transitioning,
}

impl PlayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Transitioning => "transitioning",
        }
    }
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlayState {
    type Err = String;

    /// Parses both the lowercase form and the UPnP transport state names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "playing" => Ok(Self::Playing),
            "paused" | "paused_playback" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            "transitioning" => Ok(Self::Transitioning),
            other => Err(format!("unknown play state: {}", other)),
        }
    }
}

/// Returns the label used when logging a mute state.
pub fn mute_label(is_muted: bool) -> &'static str {
    if is_muted {
        "muted"
    } else {
        "unmuted"
    }
}

/// Synchronized state of one group.
///
/// Values are treated as immutable: each `with_*` method returns a copy with
/// exactly one dimension replaced, so a partial update never disturbs the
/// other fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupState {
    pub group: Group,
    #[serde(default)]
    pub track: Option<Track>,
    pub play_state: PlayState,
    pub volume: u8,
    pub is_muted: bool,
}

impl GroupState {
    pub fn new(
        group: Group,
        track: Track,
        play_state: PlayState,
        volume: u8,
        is_muted: bool,
    ) -> Self {
        Self {
            group,
            track: Some(track),
            play_state,
            volume: volume.min(100),
            is_muted,
        }
    }

    #[must_use]
    pub fn with_group(&self, group: Group) -> Self {
        Self {
            group,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_track(&self, track: Track) -> Self {
        Self {
            track: Some(track),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_volume(&self, volume: u8) -> Self {
        Self {
            volume: volume.min(100),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_mute(&self, is_muted: bool) -> Self {
        Self {
            is_muted,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_play_state(&self, play_state: PlayState) -> Self {
        Self {
            play_state,
            ..self.clone()
        }
    }

    /// Returns true if the group is playing something displayable.
    pub fn is_playing_track(&self) -> bool {
        self.play_state == PlayState::Playing && self.track.is_some()
    }
}

/// One of the four independently tracked facets of a group's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Dimension {
    Track,
    Volume,
    Mute,
    PlayState,
}

impl Dimension {
    /// Every dimension, in the order listeners are attached.
    pub const ALL: [Dimension; 4] = [
        Dimension::Track,
        Dimension::Volume,
        Dimension::Mute,
        Dimension::PlayState,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Volume => "volume",
            Self::Mute => "mute",
            Self::PlayState => "playState",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change to a single dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupChange {
    Track(Track),
    Volume(u8),
    Mute(bool),
    PlayState(PlayState),
}

impl GroupChange {
    pub fn dimension(&self) -> Dimension {
        match self {
            Self::Track(_) => Dimension::Track,
            Self::Volume(_) => Dimension::Volume,
            Self::Mute(_) => Dimension::Mute,
            Self::PlayState(_) => Dimension::PlayState,
        }
    }

    /// Brings the carried value into range (volume is capped at 100).
    #[must_use]
    pub fn clamped(self) -> Self {
        match self {
            Self::Volume(volume) => Self::Volume(volume.min(100)),
            other => other,
        }
    }

    /// Applies this change on top of `state`, returning the merged value.
    pub fn apply_to(&self, state: &GroupState) -> GroupState {
        match self {
            Self::Track(track) => state.with_track(track.clone()),
            Self::Volume(volume) => state.with_volume(*volume),
            Self::Mute(is_muted) => state.with_mute(*is_muted),
            Self::PlayState(play_state) => state.with_play_state(*play_state),
        }
    }
}

/// An incremental change for one group, as produced by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupUpdate {
    /// Group snapshot of the session that produced the change.
    pub group: Group,
    pub change: GroupChange,
}

impl GroupUpdate {
    pub fn new(group: Group, change: GroupChange) -> Self {
        Self { group, change }
    }

    pub fn group_id(&self) -> &GroupId {
        &self.group.id
    }
}
