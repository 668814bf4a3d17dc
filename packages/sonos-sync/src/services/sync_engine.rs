//! Group discovery and synchronization engine.
//!
//! This is a facade that orchestrates:
//! - [`DiscoveryManager`] - Device resolution, topology subscription, backoff
//! - [`synchronize`] - Initial snapshot of every group
//! - [`StateHandle`] - The task owning the group-state map
//! - [`ChangeDispatcher`] - Event listeners or polling timers per group

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::SyncResult;
use crate::events::EventEmitter;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::sonos::traits::CapabilityProvider;
use crate::state::{GroupStateMap, SyncConfig};
use crate::utils::diag;

use super::change_dispatcher::{ChangeDispatcher, DispatchMode};
use super::discovery_manager::{DiscoveryManager, DiscoveryPhase};
use super::group_synchronizer::synchronize;
use super::state_owner::StateHandle;

/// Keeps the group-state map of a household current.
///
/// Created with [`SyncEngine::new`], driven by [`start`](Self::start) and
/// shut down with [`stop`](Self::stop). Every snapshot and change is
/// published through the [`EventEmitter`] given at construction.
pub struct SyncEngine {
    config: SyncConfig,
    discovery: DiscoveryManager,
    dispatcher: ChangeDispatcher,
    state: StateHandle,
    spawner: TokioSpawner,
    /// Engine lifetime; parent of every background task.
    cancel_token: CancellationToken,
    /// Current pipeline run, replaced on every rediscovery.
    run_token: Mutex<Option<CancellationToken>>,
    sessions: AtomicU64,
    started: AtomicBool,
    weak_self: Weak<Self>,
}

impl SyncEngine {
    /// Creates the engine and spawns the state owner.
    ///
    /// Fails if `config` does not validate.
    pub fn new(
        provider: Arc<dyn CapabilityProvider>,
        emitter: Arc<dyn EventEmitter>,
        config: SyncConfig,
        spawner: TokioSpawner,
    ) -> SyncResult<Arc<Self>> {
        config.validate()?;

        let cancel_token = CancellationToken::new();
        let state = StateHandle::spawn(&spawner, emitter, cancel_token.clone());
        let discovery =
            DiscoveryManager::new(provider, config.max_backoff_secs, config.debug_logging);
        let dispatcher = ChangeDispatcher::new(
            DispatchMode::from_config(&config),
            config.debug_logging,
            spawner.clone(),
        );

        Ok(Arc::new_cyclic(|weak_self| Self {
            config,
            discovery,
            dispatcher,
            state,
            spawner,
            cancel_token,
            run_token: Mutex::new(None),
            sessions: AtomicU64::new(0),
            started: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        }))
    }

    /// Starts discovery. Calling it again has no effect.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            log::warn!("[SyncEngine] Already started");
            return;
        }
        log::info!(
            "[SyncEngine] Starting ({:?})",
            self.dispatcher.mode()
        );
        self.discover_groups();
    }

    /// Runs the full discovery pipeline from a fresh failure chain.
    ///
    /// Cancels a pipeline run that is still in progress, including one
    /// waiting out a backoff delay.
    pub fn discover_groups(self: &Arc<Self>) {
        if self.cancel_token.is_cancelled() {
            return;
        }

        let run = self.cancel_token.child_token();
        if let Some(previous) = self.run_token.lock().replace(run.clone()) {
            previous.cancel();
        }

        let engine = Arc::clone(self);
        let token = run.clone();
        self.spawner.spawn_cancellable(run, async move {
            engine.run_pipeline(token).await;
        });
    }

    async fn run_pipeline(&self, run: CancellationToken) {
        let run = &run;
        let completed = self
            .discovery
            .run_with_backoff(run, move || self.run_session(run))
            .await;
        if !completed {
            log::debug!("[SyncEngine] Pipeline run cancelled");
        }
    }

    /// One attempt: resolve, enumerate, snapshot, attach.
    async fn run_session(&self, run: &CancellationToken) -> SyncResult<()> {
        let device = self.discovery.resolve_device().await?;
        if let Some(changes) = self.discovery.register_topology_listener() {
            self.forward_zone_changes(changes);
        }

        let groups = device.get_all_groups().await?;
        let map = synchronize(&device, &groups).await?;
        if run.is_cancelled() {
            return Ok(());
        }

        let session = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.replace(session, map);
        let attached =
            self.dispatcher
                .attach(session, &device, &groups, &self.state, &self.cancel_token);
        self.discovery.set_phase(DiscoveryPhase::Subscribed);

        log::info!(
            "[SyncEngine] Session {}: synchronized {} groups, {} listeners attached",
            session,
            groups.len(),
            attached
        );
        Ok(())
    }

    fn forward_zone_changes(&self, mut changes: BoxStream<'static, ()>) {
        let weak = self.weak_self.clone();
        let debug = self.config.debug_logging;

        self.spawner
            .spawn_cancellable(self.cancel_token.clone(), async move {
                while changes.next().await.is_some() {
                    let Some(engine) = weak.upgrade() else {
                        break;
                    };
                    diag!(
                        debug,
                        "[SyncEngine] Zones have changed. Rediscovering all groups..."
                    );
                    engine.discover_groups();
                }
            });
    }

    /// Stops change detection and releases the topology subscription.
    pub async fn stop(&self) {
        self.discovery.set_phase(DiscoveryPhase::Stopped);
        if let Some(run) = self.run_token.lock().take() {
            run.cancel();
        }
        let detached = self.dispatcher.detach();
        self.discovery.release_subscription().await;
        self.cancel_token.cancel();
        log::info!("[SyncEngine] Stopped, {} listeners detached", detached);
    }

    /// Returns a copy of the current group-state map.
    pub async fn snapshot(&self) -> GroupStateMap {
        self.state.snapshot().await
    }

    pub fn phase(&self) -> DiscoveryPhase {
        self.discovery.phase()
    }

    /// Number of synchronization sessions completed so far.
    pub fn session_count(&self) -> u64 {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Number of event listeners or polling timers currently attached.
    pub fn active_subscriptions(&self) -> usize {
        self.dispatcher.active_subscriptions()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}
