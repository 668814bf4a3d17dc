//! Engine configuration and the group-state map.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::sonos::backoff::MAX_BACKOFF_SECS;
use crate::sonos::types::{GroupId, GroupState, GroupUpdate};

/// Configuration for the synchronization engine.
///
/// All fields have sensible defaults. Deserialization also accepts the
/// legacy option names (`listen_with_polling`, `polling_timeout`, `debug`)
/// and their camelCase spellings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SyncConfigFile")]
pub struct SyncConfig {
    /// Subscribe to device events instead of polling.
    pub use_event_mode: bool,

    /// Interval between polls of each group (milliseconds). Only used when
    /// `use_event_mode` is false.
    pub polling_interval_ms: u64,

    /// Emit per-group diagnostics at `info` instead of `debug`.
    pub debug_logging: bool,

    /// Upper bound for the discovery retry delay (seconds).
    pub max_backoff_secs: u64,

    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            use_event_mode: true,
            polling_interval_ms: 5000,
            debug_logging: false,
            max_backoff_secs: MAX_BACKOFF_SECS,
            event_channel_capacity: 100,
        }
    }
}

impl SyncConfig {
    /// Returns the polling interval as a `Duration`.
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> SyncResult<()> {
        if !self.use_event_mode && self.polling_interval_ms == 0 {
            return Err(SyncError::Configuration(
                "polling_interval_ms must be >= 1 when polling".to_string(),
            ));
        }
        if self.max_backoff_secs == 0 {
            return Err(SyncError::Configuration(
                "max_backoff_secs must be >= 1".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(SyncError::Configuration(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            ));
        }
        Ok(())
    }
}

/// On-disk shape of [`SyncConfig`], tolerant of legacy option names.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SyncConfigFile {
    #[serde(alias = "useEventMode")]
    use_event_mode: Option<bool>,
    #[serde(alias = "listenWithPolling")]
    listen_with_polling: Option<bool>,
    #[serde(
        alias = "pollingIntervalMs",
        alias = "polling_timeout",
        alias = "pollingTimeout"
    )]
    polling_interval_ms: Option<u64>,
    #[serde(alias = "debugLogging", alias = "debug")]
    debug_logging: Option<bool>,
    #[serde(alias = "maxBackoffSecs")]
    max_backoff_secs: Option<u64>,
    #[serde(alias = "eventChannelCapacity")]
    event_channel_capacity: Option<usize>,
}

impl From<SyncConfigFile> for SyncConfig {
    fn from(file: SyncConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            use_event_mode: file
                .use_event_mode
                .or(file.listen_with_polling.map(|polling| !polling))
                .unwrap_or(defaults.use_event_mode),
            polling_interval_ms: file
                .polling_interval_ms
                .unwrap_or(defaults.polling_interval_ms),
            debug_logging: file.debug_logging.unwrap_or(defaults.debug_logging),
            max_backoff_secs: file.max_backoff_secs.unwrap_or(defaults.max_backoff_secs),
            event_channel_capacity: file
                .event_channel_capacity
                .unwrap_or(defaults.event_channel_capacity),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Group State Map
// ─────────────────────────────────────────────────────────────────────────────

/// Canonical map of group id to synchronized state.
///
/// Holds at most one entry per group. Only a full resynchronization adds
/// entries; incremental updates can only modify existing ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupStateMap(BTreeMap<GroupId, GroupState>);

impl GroupStateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state for a group, if known.
    pub fn get(&self, id: &GroupId) -> Option<&GroupState> {
        self.0.get(id)
    }

    pub fn contains(&self, id: &GroupId) -> bool {
        self.0.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, GroupId, GroupState> {
        self.0.iter()
    }

    pub fn values(&self) -> btree_map::Values<'_, GroupId, GroupState> {
        self.0.values()
    }

    /// Merges an incremental update into the matching entry.
    ///
    /// The entry's group snapshot and the one changed dimension are
    /// replaced; everything else is preserved. Returns `false` and leaves
    /// the map untouched when the group is unknown.
    pub fn apply(&mut self, update: &GroupUpdate) -> bool {
        match self.0.get_mut(update.group_id()) {
            Some(entry) => {
                *entry = update
                    .change
                    .apply_to(&entry.with_group(update.group.clone()));
                true
            }
            None => false,
        }
    }
}

impl FromIterator<GroupState> for GroupStateMap {
    fn from_iter<I: IntoIterator<Item = GroupState>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|state| (state.group.id.clone(), state))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a GroupStateMap {
    type Item = (&'a GroupId, &'a GroupState);
    type IntoIter = btree_map::Iter<'a, GroupId, GroupState>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
