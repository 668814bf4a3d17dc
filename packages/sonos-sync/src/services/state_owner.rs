//! Single owner of the group-state map.
//!
//! All writes go through one background task fed by an mpsc channel, so
//! snapshots and incremental updates from concurrent listeners are applied
//! one at a time and in arrival order. The task is also the only place that
//! publishes to the [`EventEmitter`], which keeps a session's snapshot ahead
//! of its updates.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::events::EventEmitter;
use crate::runtime::TaskSpawner;
use crate::sonos::types::GroupUpdate;
use crate::state::GroupStateMap;

enum StateCommand {
    /// Replaces the map with a full resynchronization and opens `session`.
    Replace { session: u64, map: GroupStateMap },
    /// Merges one change produced by `session`.
    Update { session: u64, update: GroupUpdate },
    Snapshot(oneshot::Sender<GroupStateMap>),
}

/// Cloneable handle for writing to and reading from the owned map.
#[derive(Clone)]
pub struct StateHandle {
    tx: mpsc::UnboundedSender<StateCommand>,
}

impl StateHandle {
    /// Spawns the owning task. It stops when `token` is cancelled.
    pub fn spawn<S: TaskSpawner>(
        spawner: &S,
        emitter: Arc<dyn EventEmitter>,
        token: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        spawner.spawn_cancellable(token, run_owner(rx, emitter));
        Self { tx }
    }

    /// Installs the result of a full synchronization and publishes it.
    ///
    /// Ignored if a later session has already replaced the map.
    pub fn replace(&self, session: u64, map: GroupStateMap) {
        self.send(StateCommand::Replace { session, map });
    }

    /// Queues an incremental update.
    ///
    /// The owner drops it if `session` is no longer current or if the group
    /// is not in the map.
    pub fn update(&self, session: u64, update: GroupUpdate) {
        self.send(StateCommand::Update { session, update });
    }

    /// Returns a copy of the current map.
    ///
    /// Returns an empty map once the owner has stopped.
    pub async fn snapshot(&self) -> GroupStateMap {
        let (reply, rx) = oneshot::channel();
        self.send(StateCommand::Snapshot(reply));
        rx.await.unwrap_or_default()
    }

    fn send(&self, command: StateCommand) {
        if self.tx.send(command).is_err() {
            log::debug!("[StateOwner] Owner stopped, command dropped");
        }
    }
}

async fn run_owner(mut rx: mpsc::UnboundedReceiver<StateCommand>, emitter: Arc<dyn EventEmitter>) {
    let mut map = GroupStateMap::new();
    let mut current_session = 0u64;

    while let Some(command) = rx.recv().await {
        match command {
            StateCommand::Replace { session, map: next } => {
                if session < current_session {
                    log::debug!(
                        "[StateOwner] Ignoring snapshot from superseded session {}",
                        session
                    );
                    continue;
                }
                current_session = session;
                map = next;
                emitter.publish_snapshot(&map);
            }
            StateCommand::Update { session, mut update } => {
                if session != current_session {
                    log::debug!(
                        "[StateOwner] Dropping update for {} from stale session {}",
                        update.group_id(),
                        session
                    );
                    continue;
                }
                update.change = update.change.clamped();
                if !map.apply(&update) {
                    log::debug!(
                        "[StateOwner] Dropping update for unknown group {}",
                        update.group_id()
                    );
                    continue;
                }
                emitter.publish_update(&update);
            }
            StateCommand::Snapshot(reply) => {
                let _ = reply.send(map.clone());
            }
        }
    }
}
