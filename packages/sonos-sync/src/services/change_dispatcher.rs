//! Per-group change detection.
//!
//! Attaches either four event listeners or one polling timer to every group
//! of a discovery session and forwards each detected change to the state
//! owner. All listeners and timers of a session share one cancellation token,
//! so attaching a new session first tears down the previous one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::SyncResult;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::services::state_owner::StateHandle;
use crate::sonos::subscription::SessionSubscriptions;
use crate::sonos::traits::{DeviceHandle, GroupHandle};
use crate::sonos::types::{mute_label, Dimension, Group, GroupChange, GroupUpdate, PlayState, Track};
use crate::state::SyncConfig;
use crate::utils::diag;

/// Strategy used to detect changes, fixed for a whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Forward device events as they arrive.
    Events,
    /// Query every group at a fixed interval and emit what changed.
    Polling { interval: Duration },
}

impl DispatchMode {
    pub fn from_config(config: &SyncConfig) -> Self {
        if config.use_event_mode {
            Self::Events
        } else {
            Self::Polling {
                interval: config.polling_interval(),
            }
        }
    }
}

/// Last observed values of one polled group.
///
/// A dimension with no previous observation always reports a change.
#[derive(Debug, Default)]
pub struct PollTracker {
    track: Option<Track>,
    volume: Option<u8>,
    muted: Option<bool>,
    play_state: Option<PlayState>,
    in_flight: HashSet<Dimension>,
}

impl PollTracker {
    /// Tracks count as unchanged when title and artist match.
    pub fn observe_track(&mut self, track: Track) -> Option<GroupChange> {
        if matches!(&self.track, Some(last) if last.is_same_song(&track)) {
            return None;
        }
        self.track = Some(track.clone());
        Some(GroupChange::Track(track))
    }

    pub fn observe_volume(&mut self, volume: u8) -> Option<GroupChange> {
        if self.volume == Some(volume) {
            return None;
        }
        self.volume = Some(volume);
        Some(GroupChange::Volume(volume))
    }

    pub fn observe_mute(&mut self, muted: bool) -> Option<GroupChange> {
        if self.muted == Some(muted) {
            return None;
        }
        self.muted = Some(muted);
        Some(GroupChange::Mute(muted))
    }

    pub fn observe_play_state(&mut self, state: PlayState) -> Option<GroupChange> {
        if self.play_state == Some(state) {
            return None;
        }
        self.play_state = Some(state);
        Some(GroupChange::PlayState(state))
    }

    /// Marks a query for `dimension` as started.
    ///
    /// Returns false while the previous query for that dimension is still
    /// outstanding.
    pub fn begin(&mut self, dimension: Dimension) -> bool {
        self.in_flight.insert(dimension)
    }

    /// Records the outcome of a query started with [`begin`](Self::begin).
    ///
    /// A failed query reports nothing and leaves the last value in place.
    pub fn finish(
        &mut self,
        dimension: Dimension,
        result: SyncResult<GroupChange>,
    ) -> Option<GroupChange> {
        self.in_flight.remove(&dimension);
        match result.ok()? {
            GroupChange::Track(track) => self.observe_track(track),
            GroupChange::Volume(volume) => self.observe_volume(volume),
            GroupChange::Mute(muted) => self.observe_mute(muted),
            GroupChange::PlayState(state) => self.observe_play_state(state),
        }
    }
}

/// Reads the current value of one dimension from `handle`.
pub async fn query_dimension(
    handle: &dyn GroupHandle,
    dimension: Dimension,
) -> SyncResult<GroupChange> {
    Ok(match dimension {
        Dimension::Track => GroupChange::Track(handle.current_track().await?),
        Dimension::Volume => GroupChange::Volume(handle.volume().await?),
        Dimension::Mute => GroupChange::Mute(handle.muted().await?),
        Dimension::PlayState => GroupChange::PlayState(handle.play_state().await?),
    })
}

fn log_change(debug: bool, group: &Group, change: &GroupChange) {
    match change {
        GroupChange::Track(track) => diag!(
            debug,
            "[Group {} - {}] Track changed to \"{}\" by \"{}\"",
            group.name,
            group.host,
            track.title,
            track.artist.as_deref().unwrap_or_default()
        ),
        GroupChange::Volume(volume) => diag!(
            debug,
            "[Group {} - {}] Volume changed to \"{}\"",
            group.name,
            group.host,
            volume
        ),
        GroupChange::Mute(muted) => diag!(
            debug,
            "[Group {} - {}] Group is {}",
            group.name,
            group.host,
            mute_label(*muted)
        ),
        GroupChange::PlayState(state) => diag!(
            debug,
            "[Group {} - {}] Play state changed to \"{}\"",
            group.name,
            group.host,
            state
        ),
    }
}

/// Where a listener or timer sends what it detects.
#[derive(Clone)]
struct ChangeSink {
    group: Group,
    session: u64,
    state: StateHandle,
    debug: bool,
}

impl ChangeSink {
    fn send(&self, change: GroupChange) {
        log_change(self.debug, &self.group, &change);
        self.state
            .update(self.session, GroupUpdate::new(self.group.clone(), change));
    }
}

async fn forward_events(mut events: BoxStream<'static, GroupChange>, sink: ChangeSink) {
    while let Some(change) = events.next().await {
        sink.send(change);
    }
}

/// Polls one group until `token` is cancelled.
///
/// Every tick starts one task per dimension, so a query that never answers
/// holds back neither the other dimensions nor the next tick. A dimension
/// whose previous query is still outstanding is skipped for that tick.
async fn poll_group(
    handle: Arc<dyn GroupHandle>,
    interval: Duration,
    sink: ChangeSink,
    spawner: TokioSpawner,
    token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let tracker = Arc::new(Mutex::new(PollTracker::default()));

    loop {
        ticker.tick().await;
        for dimension in Dimension::ALL {
            if !tracker.lock().begin(dimension) {
                log::debug!(
                    "[ChangeDispatcher] {} query for \"{}\" still pending, skipping",
                    dimension,
                    sink.group.name
                );
                continue;
            }

            let handle = Arc::clone(&handle);
            let tracker = Arc::clone(&tracker);
            let sink = sink.clone();
            spawner.spawn_cancellable(token.clone(), async move {
                let result = query_dimension(handle.as_ref(), dimension).await;
                let change = tracker.lock().finish(dimension, result);
                if let Some(change) = change {
                    sink.send(change);
                }
            });
        }
    }
}

/// Attaches and detaches the listeners or timers of a session.
pub struct ChangeDispatcher {
    mode: DispatchMode,
    debug: bool,
    spawner: TokioSpawner,
    current: Mutex<Option<SessionSubscriptions>>,
}

impl ChangeDispatcher {
    pub fn new(mode: DispatchMode, debug: bool, spawner: TokioSpawner) -> Self {
        Self {
            mode,
            debug,
            spawner,
            current: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Starts change detection for `groups` on behalf of `session`.
    ///
    /// Cancels everything attached for the previous session first; a
    /// session older than the attached one is ignored. Event streams are
    /// opened before this returns. Returns the number of listeners or timers
    /// started.
    pub fn attach(
        &self,
        session: u64,
        device: &Arc<dyn DeviceHandle>,
        groups: &[Group],
        state: &StateHandle,
        parent: &CancellationToken,
    ) -> usize {
        let superseded = matches!(
            self.current.lock().as_ref(),
            Some(current) if current.session() > session
        );
        if superseded {
            log::debug!(
                "[ChangeDispatcher] Not attaching superseded session {}",
                session
            );
            return 0;
        }
        self.detach();

        let mut subscriptions = SessionSubscriptions::new(session, parent);
        match self.mode {
            DispatchMode::Events => diag!(self.debug, "[ChangeDispatcher] Listening with events"),
            DispatchMode::Polling { interval } => diag!(
                self.debug,
                "[ChangeDispatcher] Listening with polling every {:?}",
                interval
            ),
        }

        for group in groups {
            diag!(
                self.debug,
                "[ChangeDispatcher] Registering listeners for group \"{}\" (host \"{}\")",
                group.name,
                group.host
            );
            let handle = device.coordinator(group);
            let sink = ChangeSink {
                group: group.clone(),
                session,
                state: state.clone(),
                debug: self.debug,
            };

            match self.mode {
                DispatchMode::Events => {
                    for dimension in Dimension::ALL {
                        let subscription =
                            subscriptions.register(format!("{}/{}", group.name, dimension));
                        self.spawner.spawn_cancellable(
                            subscription.token().clone(),
                            forward_events(handle.listen(dimension), sink.clone()),
                        );
                    }
                }
                DispatchMode::Polling { interval } => {
                    let subscription = subscriptions.register(format!("{}/poll", group.name));
                    let token = subscription.token().clone();
                    self.spawner.spawn_cancellable(
                        token.clone(),
                        poll_group(
                            Arc::clone(&handle),
                            interval,
                            sink,
                            self.spawner.clone(),
                            token,
                        ),
                    );
                }
            }
        }

        if subscriptions.is_empty() {
            diag!(self.debug, "[ChangeDispatcher] Session {} has no groups", session);
        }
        let started = subscriptions.len();
        *self.current.lock() = Some(subscriptions);
        started
    }

    /// Cancels every listener and timer of the current session.
    ///
    /// Returns how many were still active.
    pub fn detach(&self) -> usize {
        let Some(subscriptions) = self.current.lock().take() else {
            return 0;
        };
        let cancelled = subscriptions.cancel_all();
        if cancelled > 0 {
            diag!(
                self.debug,
                "[ChangeDispatcher] Stopped {} listeners of session {}",
                cancelled,
                subscriptions.session()
            );
        }
        cancelled
    }

    /// Number of listeners or timers currently attached.
    pub fn active_subscriptions(&self) -> usize {
        self.current
            .lock()
            .as_ref()
            .map(SessionSubscriptions::active)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BroadcastEventBridge, SyncEvent};
    use crate::sonos::memory::InMemoryProvider;
    use crate::sonos::traits::DeviceDiscovery;
    use crate::sonos::types::{GroupId, GroupState};
    use crate::state::GroupStateMap;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    fn track(title: &str, artist: &str) -> Track {
        Track {
            title: title.into(),
            artist: Some(artist.into()),
            ..Default::default()
        }
    }

    fn kitchen() -> GroupState {
        GroupState::new(
            Group {
                id: GroupId::new("RINCON_K:1"),
                name: "Kitchen".into(),
                member_names: vec!["Kitchen".into()],
                host: "10.0.0.1".into(),
            },
            track("A", "X"),
            PlayState::Playing,
            25,
            false,
        )
    }

    struct Harness {
        provider: InMemoryProvider,
        device: Arc<dyn DeviceHandle>,
        groups: Vec<Group>,
        state: StateHandle,
        rx: broadcast::Receiver<SyncEvent>,
        root: CancellationToken,
    }

    async fn harness() -> Harness {
        let provider = InMemoryProvider::new("10.0.0.1");
        provider.set_groups(vec![kitchen()]);
        let device = provider.discover().await.unwrap();
        let groups = device.get_all_groups().await.unwrap();

        let bridge = BroadcastEventBridge::new(64);
        let rx = bridge.subscribe();
        let root = CancellationToken::new();
        let state = StateHandle::spawn(&TokioSpawner::current(), Arc::new(bridge), root.clone());
        state.replace(1, vec![kitchen()].into_iter().collect::<GroupStateMap>());

        Harness {
            provider,
            device,
            groups,
            state,
            rx,
            root,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if !event.is_snapshot() {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn same_song_is_not_a_track_change() {
        let mut tracker = PollTracker::default();
        assert!(tracker.observe_track(track("A", "X")).is_some());
        assert!(tracker.observe_track(track("A", "X")).is_none());

        let mut tracker = PollTracker::default();
        tracker.observe_track(track("A", "X"));
        assert_eq!(
            tracker.observe_track(track("B", "X")),
            Some(GroupChange::Track(track("B", "X")))
        );
    }

    #[test]
    fn first_observation_always_emits() {
        let mut tracker = PollTracker::default();
        assert_eq!(tracker.observe_mute(false), Some(GroupChange::Mute(false)));
        assert_eq!(tracker.observe_volume(0), Some(GroupChange::Volume(0)));
        assert!(tracker.observe_mute(false).is_none());
        assert!(tracker.observe_volume(0).is_none());
        assert!(tracker.observe_play_state(PlayState::Stopped).is_some());
        assert!(tracker.observe_play_state(PlayState::Stopped).is_none());
    }

    #[test]
    fn outstanding_query_blocks_only_its_dimension() {
        let mut tracker = PollTracker::default();
        assert!(tracker.begin(Dimension::Track));
        assert!(!tracker.begin(Dimension::Track));
        assert!(tracker.begin(Dimension::Volume));

        assert_eq!(
            tracker.finish(Dimension::Volume, Ok(GroupChange::Volume(12))),
            Some(GroupChange::Volume(12))
        );
        assert!(tracker
            .finish(
                Dimension::Track,
                Err(crate::error::SyncError::query(
                    &GroupId::new("RINCON_K:1"),
                    Dimension::Track,
                    "timeout"
                ))
            )
            .is_none());
        assert!(tracker.begin(Dimension::Track));
    }

    /// Coordinator whose track query never answers and whose volume moves
    /// on every read.
    struct StalledTrack {
        volume_reads: AtomicUsize,
        track_reads: AtomicUsize,
    }

    #[async_trait]
    impl GroupHandle for StalledTrack {
        async fn current_track(&self) -> SyncResult<Track> {
            self.track_reads.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn play_state(&self) -> SyncResult<PlayState> {
            Ok(PlayState::Playing)
        }

        async fn volume(&self) -> SyncResult<u8> {
            Ok(10 + self.volume_reads.fetch_add(1, Ordering::SeqCst) as u8)
        }

        async fn muted(&self) -> SyncResult<bool> {
            Ok(false)
        }

        fn listen(&self, _dimension: Dimension) -> BoxStream<'static, GroupChange> {
            futures::stream::empty().boxed()
        }
    }

    struct StalledDevice(Arc<StalledTrack>);

    #[async_trait]
    impl DeviceHandle for StalledDevice {
        fn host(&self) -> &str {
            "10.0.0.1"
        }

        async fn get_all_groups(&self) -> SyncResult<Vec<Group>> {
            Ok(vec![kitchen().group])
        }

        fn coordinator(&self, _group: &Group) -> Arc<dyn GroupHandle> {
            self.0.clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_query_does_not_hold_back_other_dimensions() {
        let mut h = harness().await;
        let handle = Arc::new(StalledTrack {
            volume_reads: AtomicUsize::new(0),
            track_reads: AtomicUsize::new(0),
        });
        let device: Arc<dyn DeviceHandle> = Arc::new(StalledDevice(handle.clone()));
        let dispatcher = ChangeDispatcher::new(
            DispatchMode::Polling {
                interval: Duration::from_secs(1),
            },
            false,
            TokioSpawner::current(),
        );
        dispatcher.attach(1, &device, &h.groups, &h.state, &h.root);

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        let events = drain(&mut h.rx);

        let count = |f: fn(&SyncEvent) -> bool| events.iter().filter(|e| f(e)).count();
        assert_eq!(count(|e| matches!(e, SyncEvent::VolumeChanged { .. })), 10);
        assert_eq!(count(|e| matches!(e, SyncEvent::MuteChanged { .. })), 1);
        assert_eq!(count(|e| matches!(e, SyncEvent::PlayStateChanged { .. })), 1);
        assert_eq!(count(|e| matches!(e, SyncEvent::TrackChanged { .. })), 0);
        assert_eq!(handle.volume_reads.load(Ordering::SeqCst), 10);
        assert_eq!(handle.track_reads.load(Ordering::SeqCst), 1);

        let snapshot = h.state.snapshot().await;
        assert_eq!(snapshot.get(&GroupId::new("RINCON_K:1")).unwrap().volume, 19);
    }

    #[test]
    fn mode_follows_config() {
        assert_eq!(
            DispatchMode::from_config(&SyncConfig::default()),
            DispatchMode::Events
        );
        let polling = SyncConfig {
            use_event_mode: false,
            polling_interval_ms: 250,
            ..Default::default()
        };
        assert_eq!(
            DispatchMode::from_config(&polling),
            DispatchMode::Polling {
                interval: Duration::from_millis(250)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn polling_emits_only_changes() {
        let mut h = harness().await;
        let dispatcher = ChangeDispatcher::new(
            DispatchMode::Polling {
                interval: Duration::from_secs(1),
            },
            false,
            TokioSpawner::current(),
        );
        let id = GroupId::new("RINCON_K:1");

        assert_eq!(dispatcher.attach(1, &h.device, &h.groups, &h.state, &h.root), 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(drain(&mut h.rx).len(), 4);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(drain(&mut h.rx).is_empty());

        h.provider.set_state(&id, GroupChange::Track(track("B", "X")));
        tokio::time::sleep(Duration::from_secs(1)).await;
        let events = drain(&mut h.rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SyncEvent::TrackChanged { track, .. } if track.title == "B"));
    }

    #[tokio::test(start_paused = true)]
    async fn polling_failures_skip_only_that_dimension() {
        let mut h = harness().await;
        let id = GroupId::new("RINCON_K:1");
        h.provider.fail_next_queries(&id, Dimension::Volume, 1);
        let dispatcher = ChangeDispatcher::new(
            DispatchMode::Polling {
                interval: Duration::from_secs(1),
            },
            true,
            TokioSpawner::current(),
        );
        dispatcher.attach(1, &h.device, &h.groups, &h.state, &h.root);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let first = drain(&mut h.rx);
        assert_eq!(first.len(), 3);
        assert!(!first
            .iter()
            .any(|e| matches!(e, SyncEvent::VolumeChanged { .. })));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = drain(&mut h.rx);
        assert_eq!(second.len(), 1);
        assert!(matches!(second[0], SyncEvent::VolumeChanged { volume: 25, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn reattaching_polling_keeps_one_timer_per_group() {
        let h = harness().await;
        let id = GroupId::new("RINCON_K:1");
        let dispatcher = ChangeDispatcher::new(
            DispatchMode::Polling {
                interval: Duration::from_secs(1),
            },
            false,
            TokioSpawner::current(),
        );

        dispatcher.attach(1, &h.device, &h.groups, &h.state, &h.root);
        dispatcher.attach(2, &h.device, &h.groups, &h.state, &h.root);
        assert_eq!(dispatcher.active_subscriptions(), 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(h.provider.query_count(&id), 4);
    }

    #[tokio::test]
    async fn events_are_forwarded_unconditionally() {
        let mut h = harness().await;
        let id = GroupId::new("RINCON_K:1");
        let dispatcher = ChangeDispatcher::new(DispatchMode::Events, false, TokioSpawner::current());

        assert_eq!(dispatcher.attach(1, &h.device, &h.groups, &h.state, &h.root), 4);
        assert_eq!(h.provider.active_event_listeners(), 4);

        h.provider.push_event(&id, GroupChange::Volume(25));
        h.provider.push_event(&id, GroupChange::Volume(25));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let events = drain(&mut h.rx);
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(e, SyncEvent::VolumeChanged { volume: 25, .. })));
    }

    #[tokio::test]
    async fn reattaching_events_releases_old_listeners() {
        let h = harness().await;
        let dispatcher = ChangeDispatcher::new(DispatchMode::Events, false, TokioSpawner::current());

        dispatcher.attach(1, &h.device, &h.groups, &h.state, &h.root);
        dispatcher.attach(2, &h.device, &h.groups, &h.state, &h.root);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.provider.active_event_listeners(), 4);

        assert_eq!(dispatcher.detach(), 4);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.provider.active_event_listeners(), 0);
        assert_eq!(dispatcher.detach(), 0);
    }

    #[tokio::test]
    async fn empty_household_starts_nothing() {
        let h = harness().await;
        let dispatcher = ChangeDispatcher::new(DispatchMode::Events, true, TokioSpawner::current());

        assert_eq!(dispatcher.attach(1, &h.device, &[], &h.state, &h.root), 0);
        assert_eq!(dispatcher.active_subscriptions(), 0);
        assert_eq!(h.provider.active_event_listeners(), 0);
    }

    #[tokio::test]
    async fn older_session_does_not_replace_newer() {
        let h = harness().await;
        let dispatcher = ChangeDispatcher::new(DispatchMode::Events, false, TokioSpawner::current());

        dispatcher.attach(3, &h.device, &h.groups, &h.state, &h.root);
        assert_eq!(dispatcher.attach(2, &h.device, &h.groups, &h.state, &h.root), 0);
        assert_eq!(dispatcher.active_subscriptions(), 4);
    }
}
