//! Discovery lifecycle: device resolution, topology subscription and retry.
//!
//! Responsibilities:
//! - Resolving a device once and sharing the in-flight result between callers
//! - Subscribing to topology changes on the resolved device
//! - Retrying failed pipeline runs with a capped quadratic backoff

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::BoxStream;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorCode, SyncResult};
use crate::sonos::backoff::Backoff;
use crate::sonos::traits::{CapabilityProvider, DeviceHandle};
use crate::utils::diag;

type PendingDevice = Shared<BoxFuture<'static, SyncResult<Arc<dyn DeviceHandle>>>>;

/// Where the discovery lifecycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryPhase {
    /// Nothing started yet.
    Idle,
    /// A pipeline run is resolving the device or synchronizing groups.
    Discovering,
    /// The last run failed; the next one starts after `delay`.
    BackoffWait { attempt: u32, delay: Duration },
    /// Groups are synchronized and change detection is attached.
    Subscribed,
    /// The engine was stopped.
    Stopped,
}

/// Owns the discovered device and the topology subscription.
pub struct DiscoveryManager {
    provider: Arc<dyn CapabilityProvider>,
    in_flight: Mutex<Option<PendingDevice>>,
    listener_registered: AtomicBool,
    phase: RwLock<DiscoveryPhase>,
    max_backoff_secs: u64,
    debug: bool,
}

impl DiscoveryManager {
    pub fn new(provider: Arc<dyn CapabilityProvider>, max_backoff_secs: u64, debug: bool) -> Self {
        Self {
            provider,
            in_flight: Mutex::new(None),
            listener_registered: AtomicBool::new(false),
            phase: RwLock::new(DiscoveryPhase::Idle),
            max_backoff_secs,
            debug,
        }
    }

    pub fn phase(&self) -> DiscoveryPhase {
        *self.phase.read()
    }

    pub(crate) fn set_phase(&self, phase: DiscoveryPhase) {
        *self.phase.write() = phase;
    }

    /// Returns the discovered device, discovering and subscribing if needed.
    ///
    /// Concurrent callers share one in-flight attempt. A successful result
    /// stays cached until [`clear_in_flight`](Self::clear_in_flight).
    pub async fn resolve_device(&self) -> SyncResult<Arc<dyn DeviceHandle>> {
        let pending = self
            .in_flight
            .lock()
            .get_or_insert_with(|| {
                let provider = Arc::clone(&self.provider);
                let discovery: BoxFuture<'static, SyncResult<Arc<dyn DeviceHandle>>> =
                    async move {
                        let device = provider.discover().await?;
                        log::info!("[DiscoveryManager] Discovered device at {}", device.host());
                        provider.subscribe_to(Arc::clone(&device)).await?;
                        Ok(device)
                    }
                    .boxed();
                discovery.shared()
            })
            .clone();
        pending.await
    }

    /// Returns the topology change stream the first time it is called.
    ///
    /// Later calls return `None`, so at most one listener is ever registered.
    pub fn register_topology_listener(&self) -> Option<BoxStream<'static, ()>> {
        if self.listener_registered.swap(true, Ordering::SeqCst) {
            return None;
        }
        diag!(self.debug, "[DiscoveryManager] Registered topology listener");
        Some(self.provider.zone_changes())
    }

    /// Releases the topology subscription, if one is held.
    ///
    /// Best effort: failures are logged and never returned.
    pub async fn release_subscription(&self) {
        if !self.provider.is_listening() {
            return;
        }
        match self.provider.stop_listener().await {
            Ok(()) => diag!(
                self.debug,
                "[DiscoveryManager] Stopped all listeners to Sonos devices"
            ),
            Err(e) => log::error!(
                "[DiscoveryManager] Failed to stop listeners to Sonos devices, connections might be dangling: {}",
                e
            ),
        }
    }

    /// Forgets the cached device so the next resolve discovers again.
    pub fn clear_in_flight(&self) {
        self.in_flight.lock().take();
    }

    /// Runs `attempt` until it succeeds, backing off between failures.
    ///
    /// Each call starts a fresh failure chain. After a failure the
    /// subscription is released and the cached device dropped before
    /// waiting. Returns `false` if `token` was cancelled first.
    pub async fn run_with_backoff<F, Fut>(&self, token: &CancellationToken, mut attempt: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<()>>,
    {
        let mut backoff = Backoff::new(self.max_backoff_secs);

        loop {
            if token.is_cancelled() {
                return false;
            }
            self.set_phase(DiscoveryPhase::Discovering);

            let e = match attempt().await {
                Ok(()) => return true,
                Err(e) => e,
            };

            let delay = backoff.record_failure();
            if !e.is_retryable() {
                log::warn!(
                    "[DiscoveryManager] Unexpected {} error in discovery pipeline",
                    e.code()
                );
            }
            log::error!(
                "[DiscoveryManager] Failed to get groups: {}. Retrying in {} seconds...",
                e,
                delay.as_secs()
            );
            self.set_phase(DiscoveryPhase::BackoffWait {
                attempt: backoff.attempts(),
                delay,
            });

            self.release_subscription().await;
            self.clear_in_flight();

            tokio::select! {
                _ = token.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::sonos::memory::InMemoryProvider;
    use crate::sonos::traits::TopologyListener;
    use std::sync::atomic::AtomicU32;
    use tokio::time::Instant;

    fn manager(provider: &InMemoryProvider) -> DiscoveryManager {
        DiscoveryManager::new(Arc::new(provider.clone()), 30, false)
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_discovery() {
        let provider = InMemoryProvider::new("10.0.0.7");
        let manager = manager(&provider);

        let (a, b) = tokio::join!(manager.resolve_device(), manager.resolve_device());

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(provider.discovery_attempts().len(), 1);
        assert_eq!(provider.subscription_count(), 1);
        assert!(provider.is_listening());
    }

    #[tokio::test]
    async fn failed_resolve_is_retried_after_clear() {
        let provider = InMemoryProvider::new("10.0.0.7");
        provider.fail_next_discoveries(1);
        let manager = manager(&provider);

        assert!(manager.resolve_device().await.is_err());
        // Cached failure until cleared.
        assert!(manager.resolve_device().await.is_err());
        manager.clear_in_flight();
        assert!(manager.resolve_device().await.is_ok());
        assert_eq!(provider.discovery_attempts().len(), 2);
    }

    #[test]
    fn topology_listener_registers_once() {
        let provider = InMemoryProvider::new("10.0.0.7");
        let manager = manager(&provider);

        assert!(manager.register_topology_listener().is_some());
        assert!(manager.register_topology_listener().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_waits_one_then_four_seconds() {
        let provider = InMemoryProvider::new("10.0.0.7");
        provider.fail_next_discoveries(2);
        let manager = manager(&provider);
        let token = CancellationToken::new();
        let start = Instant::now();
        let manager = &manager;

        let succeeded = manager
            .run_with_backoff(&token, || async move {
                manager.resolve_device().await.map(|_| ())
            })
            .await;

        assert!(succeeded);
        let offsets: Vec<u64> = provider
            .discovery_attempts()
            .iter()
            .map(|t| t.duration_since(start).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 1, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_failure_does_not_block_retry() {
        let provider = InMemoryProvider::new("10.0.0.7");
        provider.fail_next_enumerations(1);
        provider.fail_next_teardowns(1);
        let manager = manager(&provider);
        let token = CancellationToken::new();
        let manager = &manager;

        let succeeded = manager
            .run_with_backoff(&token, || async move {
                let device = manager.resolve_device().await?;
                device.get_all_groups().await.map(|_| ())
            })
            .await;

        assert!(succeeded);
        assert_eq!(provider.teardown_count(), 1);
        assert_eq!(provider.discovery_attempts().len(), 2);
        assert_eq!(provider.subscription_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_retry_loop() {
        let provider = InMemoryProvider::new("10.0.0.7");
        let manager = manager(&provider);
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let cancel = token.clone();
        let succeeded = manager
            .run_with_backoff(&token, || {
                calls.fetch_add(1, Ordering::SeqCst);
                cancel.cancel();
                async { Err(SyncError::Enumeration("boom".into())) }
            })
            .await;

        assert!(!succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            manager.phase(),
            DiscoveryPhase::BackoffWait { attempt: 1, .. }
        ));
    }
}
