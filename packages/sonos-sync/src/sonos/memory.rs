//! In-memory capability provider.
//!
//! Holds a household's groups and their state in memory and serves them
//! through the provider traits. Failures, device events and topology changes
//! are injected by the caller, which makes the provider suitable for tests,
//! demos and replaying a captured household from a fixture file.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::{SyncError, SyncResult};
use crate::sonos::traits::{DeviceDiscovery, DeviceHandle, GroupHandle, TopologyListener};
use crate::sonos::types::{Dimension, Group, GroupChange, GroupId, GroupState, PlayState, Track};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Serializable description of a household.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdFixture {
    /// Address reported by the discovered device.
    pub host: String,
    pub groups: Vec<GroupState>,
}

/// Pending injected failures.
#[derive(Debug, Default)]
struct FailurePlan {
    discoveries: u32,
    enumerations: u32,
    teardowns: u32,
    queries: HashMap<(GroupId, Dimension), u32>,
}

/// Decrements `counter` and returns true if a failure was pending.
fn take_failure(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

struct Inner {
    host: String,
    groups: RwLock<Vec<Group>>,
    states: DashMap<GroupId, GroupState>,
    failures: Mutex<FailurePlan>,
    discovery_attempts: Mutex<Vec<Instant>>,
    enumerations: AtomicUsize,
    queries: DashMap<GroupId, usize>,
    subscriptions: AtomicUsize,
    teardowns: AtomicUsize,
    listening: AtomicBool,
    zone_tx: broadcast::Sender<()>,
    event_tx: broadcast::Sender<(GroupId, GroupChange)>,
}

impl Inner {
    fn record_query(&self, group: &GroupId, dimension: Dimension) -> SyncResult<GroupState> {
        *self.queries.entry(group.clone()).or_insert(0) += 1;

        let injected = self
            .failures
            .lock()
            .queries
            .get_mut(&(group.clone(), dimension))
            .map(take_failure)
            .unwrap_or(false);
        if injected {
            return Err(SyncError::query(group, dimension, "injected failure"));
        }

        self.states
            .get(group)
            .map(|s| s.value().clone())
            .ok_or_else(|| SyncError::query(group, dimension, "group no longer exists"))
    }
}

/// Capability provider backed by in-memory state.
///
/// Cloning yields another handle to the same household.
#[derive(Clone)]
pub struct InMemoryProvider {
    inner: Arc<Inner>,
}

impl InMemoryProvider {
    /// Creates an empty household whose device lives at `host`.
    pub fn new(host: impl Into<String>) -> Self {
        let (zone_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                host: host.into(),
                groups: RwLock::new(Vec::new()),
                states: DashMap::new(),
                failures: Mutex::new(FailurePlan::default()),
                discovery_attempts: Mutex::new(Vec::new()),
                enumerations: AtomicUsize::new(0),
                queries: DashMap::new(),
                subscriptions: AtomicUsize::new(0),
                teardowns: AtomicUsize::new(0),
                listening: AtomicBool::new(false),
                zone_tx,
                event_tx,
            }),
        }
    }

    /// Creates a provider populated from a fixture.
    pub fn from_fixture(fixture: HouseholdFixture) -> Self {
        let provider = Self::new(fixture.host);
        provider.set_groups(fixture.groups);
        provider
    }

    /// Replaces the household topology and every group's state.
    ///
    /// Does not signal a zone change; call
    /// [`signal_zones_changed`](Self::signal_zones_changed) for that.
    pub fn set_groups(&self, states: Vec<GroupState>) {
        let groups = states.iter().map(|s| s.group.clone()).collect();
        self.inner.states.clear();
        for state in states {
            self.inner.states.insert(state.group.id.clone(), state);
        }
        *self.inner.groups.write() = groups;
    }

    /// Changes a group's device state without emitting an event.
    pub fn set_state(&self, group: &GroupId, change: GroupChange) {
        if let Some(mut entry) = self.inner.states.get_mut(group) {
            let next = change.apply_to(&entry);
            *entry = next;
        }
    }

    /// Changes a group's device state and emits the matching event.
    pub fn push_event(&self, group: &GroupId, change: GroupChange) {
        self.set_state(group, change.clone());
        // No receivers just means nobody is listening in event mode.
        let _ = self.inner.event_tx.send((group.clone(), change));
    }

    /// Emits a `ZonesChanged` signal.
    pub fn signal_zones_changed(&self) {
        let _ = self.inner.zone_tx.send(());
    }

    pub fn fail_next_discoveries(&self, count: u32) {
        self.inner.failures.lock().discoveries = count;
    }

    pub fn fail_next_enumerations(&self, count: u32) {
        self.inner.failures.lock().enumerations = count;
    }

    pub fn fail_next_teardowns(&self, count: u32) {
        self.inner.failures.lock().teardowns = count;
    }

    pub fn fail_next_queries(&self, group: &GroupId, dimension: Dimension, count: u32) {
        self.inner
            .failures
            .lock()
            .queries
            .insert((group.clone(), dimension), count);
    }

    /// Instants at which `discover` was called.
    pub fn discovery_attempts(&self) -> Vec<Instant> {
        self.inner.discovery_attempts.lock().clone()
    }

    pub fn enumeration_count(&self) -> usize {
        self.inner.enumerations.load(Ordering::SeqCst)
    }

    /// Number of state queries served for `group` (all dimensions).
    pub fn query_count(&self, group: &GroupId) -> usize {
        self.inner.queries.get(group).map(|c| *c).unwrap_or(0)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.load(Ordering::SeqCst)
    }

    /// Number of `stop_listener` calls, including failed ones.
    pub fn teardown_count(&self) -> usize {
        self.inner.teardowns.load(Ordering::SeqCst)
    }

    /// Number of live per-group event streams.
    pub fn active_event_listeners(&self) -> usize {
        self.inner.event_tx.receiver_count()
    }

    fn device(&self) -> Arc<dyn DeviceHandle> {
        Arc::new(MemoryDevice {
            inner: Arc::clone(&self.inner),
        })
    }
}

#[async_trait]
impl DeviceDiscovery for InMemoryProvider {
    async fn discover(&self) -> SyncResult<Arc<dyn DeviceHandle>> {
        self.inner.discovery_attempts.lock().push(Instant::now());
        if take_failure(&mut self.inner.failures.lock().discoveries) {
            return Err(SyncError::Discovery(
                "no devices answered the search".to_string(),
            ));
        }
        Ok(self.device())
    }
}

#[async_trait]
impl TopologyListener for InMemoryProvider {
    async fn subscribe_to(&self, device: Arc<dyn DeviceHandle>) -> SyncResult<()> {
        log::debug!("[InMemoryProvider] Subscribed to {}", device.host());
        self.inner.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.inner.listening.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_listener(&self) -> SyncResult<()> {
        self.inner.teardowns.fetch_add(1, Ordering::SeqCst);
        if take_failure(&mut self.inner.failures.lock().teardowns) {
            return Err(SyncError::SubscriptionTeardown(
                "device did not acknowledge unsubscribe".to_string(),
            ));
        }
        self.inner.listening.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::SeqCst)
    }

    fn zone_changes(&self) -> BoxStream<'static, ()> {
        BroadcastStream::new(self.inner.zone_tx.subscribe())
            .filter_map(|signal| future::ready(signal.ok()))
            .boxed()
    }
}

/// Device handle served by [`InMemoryProvider::discover`].
struct MemoryDevice {
    inner: Arc<Inner>,
}

#[async_trait]
impl DeviceHandle for MemoryDevice {
    fn host(&self) -> &str {
        &self.inner.host
    }

    async fn get_all_groups(&self) -> SyncResult<Vec<Group>> {
        self.inner.enumerations.fetch_add(1, Ordering::SeqCst);
        if take_failure(&mut self.inner.failures.lock().enumerations) {
            return Err(SyncError::Enumeration(
                "zone group topology request failed".to_string(),
            ));
        }
        Ok(self.inner.groups.read().clone())
    }

    fn coordinator(&self, group: &Group) -> Arc<dyn GroupHandle> {
        Arc::new(MemoryGroup {
            inner: Arc::clone(&self.inner),
            group: group.id.clone(),
        })
    }
}

/// Coordinator handle for one in-memory group.
struct MemoryGroup {
    inner: Arc<Inner>,
    group: GroupId,
}

#[async_trait]
impl GroupHandle for MemoryGroup {
    async fn current_track(&self) -> SyncResult<Track> {
        let state = self.inner.record_query(&self.group, Dimension::Track)?;
        Ok(state.track.unwrap_or_default())
    }

    async fn play_state(&self) -> SyncResult<PlayState> {
        let state = self.inner.record_query(&self.group, Dimension::PlayState)?;
        Ok(state.play_state)
    }

    async fn volume(&self) -> SyncResult<u8> {
        let state = self.inner.record_query(&self.group, Dimension::Volume)?;
        Ok(state.volume)
    }

    async fn muted(&self) -> SyncResult<bool> {
        let state = self.inner.record_query(&self.group, Dimension::Mute)?;
        Ok(state.is_muted)
    }

    fn listen(&self, dimension: Dimension) -> BoxStream<'static, GroupChange> {
        let group = self.group.clone();
        BroadcastStream::new(self.inner.event_tx.subscribe())
            .filter_map(move |event| {
                let change = match event {
                    Ok((id, change)) if id == group && change.dimension() == dimension => {
                        Some(change)
                    }
                    _ => None,
                };
                future::ready(change)
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn living_room() -> GroupState {
        GroupState::new(
            Group {
                id: GroupId::new("RINCON_LR:1"),
                name: "Living Room".into(),
                member_names: vec!["Living Room".into()],
                host: "192.168.1.20".into(),
            },
            Track {
                title: "Song".into(),
                artist: Some("Band".into()),
                ..Default::default()
            },
            PlayState::Playing,
            35,
            false,
        )
    }

    #[tokio::test]
    async fn injected_discovery_failures_are_consumed() {
        let provider = InMemoryProvider::new("192.168.1.20");
        provider.fail_next_discoveries(1);

        assert!(matches!(
            provider.discover().await,
            Err(SyncError::Discovery(_))
        ));
        assert!(provider.discover().await.is_ok());
        assert_eq!(provider.discovery_attempts().len(), 2);
    }

    #[tokio::test]
    async fn queries_read_group_state() {
        let provider = InMemoryProvider::new("192.168.1.20");
        provider.set_groups(vec![living_room()]);
        let device = provider.discover().await.unwrap();
        let groups = device.get_all_groups().await.unwrap();
        let handle = device.coordinator(&groups[0]);

        assert_eq!(handle.volume().await.unwrap(), 35);
        assert!(!handle.muted().await.unwrap());
        assert_eq!(handle.play_state().await.unwrap(), PlayState::Playing);
        assert_eq!(handle.current_track().await.unwrap().title, "Song");
        assert_eq!(provider.query_count(&groups[0].id), 4);
    }

    #[tokio::test]
    async fn injected_query_failure_hits_one_dimension() {
        let provider = InMemoryProvider::new("192.168.1.20");
        provider.set_groups(vec![living_room()]);
        let id = GroupId::new("RINCON_LR:1");
        provider.fail_next_queries(&id, Dimension::Volume, 1);

        let device = provider.discover().await.unwrap();
        let handle = device.coordinator(&living_room().group);

        assert!(handle.volume().await.is_err());
        assert!(handle.muted().await.is_ok());
        assert!(handle.volume().await.is_ok());
    }

    #[tokio::test]
    async fn listen_filters_by_group_and_dimension() {
        let provider = InMemoryProvider::new("192.168.1.20");
        provider.set_groups(vec![living_room()]);
        let id = GroupId::new("RINCON_LR:1");
        let device = provider.discover().await.unwrap();
        let mut volumes = device.coordinator(&living_room().group).listen(Dimension::Volume);
        assert_eq!(provider.active_event_listeners(), 1);

        provider.push_event(&id, GroupChange::Mute(true));
        provider.push_event(&GroupId::new("other"), GroupChange::Volume(1));
        provider.push_event(&id, GroupChange::Volume(80));

        assert_eq!(volumes.next().await, Some(GroupChange::Volume(80)));
        drop(volumes);
        assert_eq!(provider.active_event_listeners(), 0);
    }

    #[tokio::test]
    async fn teardown_failure_keeps_listening() {
        let provider = InMemoryProvider::new("192.168.1.20");
        let device = provider.discover().await.unwrap();
        provider.subscribe_to(device).await.unwrap();
        provider.fail_next_teardowns(1);

        assert!(provider.stop_listener().await.is_err());
        assert!(provider.is_listening());
        assert!(provider.stop_listener().await.is_ok());
        assert!(!provider.is_listening());
        assert_eq!(provider.teardown_count(), 2);
    }

    #[test]
    fn fixture_deserializes_from_json() {
        let fixture: HouseholdFixture = serde_json::from_str(
            r#"{
                "host": "192.168.1.20",
                "groups": [{
                    "group": {"id": "RINCON_LR:1", "name": "Living Room", "host": "192.168.1.20"},
                    "track": {"title": "Song", "artist": "Band", "duration": 200},
                    "playState": "paused",
                    "volume": 12,
                    "isMuted": true
                }]
            }"#,
        )
        .unwrap();
        let provider = InMemoryProvider::from_fixture(fixture);
        assert_eq!(provider.inner.groups.read().len(), 1);
    }
}
