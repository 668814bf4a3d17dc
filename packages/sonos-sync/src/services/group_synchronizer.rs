//! Initial state snapshot for a set of groups.

use std::sync::Arc;

use futures::future::try_join_all;

use crate::error::SyncResult;
use crate::sonos::traits::DeviceHandle;
use crate::sonos::types::{Group, GroupState};
use crate::state::GroupStateMap;

/// Fetches track, play state, volume and mute for one group concurrently.
///
/// Fails if any of the four queries fails.
pub async fn fetch_group_state(device: &dyn DeviceHandle, group: &Group) -> SyncResult<GroupState> {
    let coordinator = device.coordinator(group);
    let (track, play_state, volume, is_muted) = tokio::try_join!(
        coordinator.current_track(),
        coordinator.play_state(),
        coordinator.volume(),
        coordinator.muted(),
    )?;
    Ok(GroupState::new(
        group.clone(),
        track,
        play_state,
        volume,
        is_muted,
    ))
}

/// Builds the group-state map for `groups`.
///
/// Groups are fetched concurrently. The pass is all-or-nothing: the first
/// failing group fails the whole synchronization.
pub async fn synchronize(
    device: &Arc<dyn DeviceHandle>,
    groups: &[Group],
) -> SyncResult<GroupStateMap> {
    let states = try_join_all(
        groups
            .iter()
            .map(|group| fetch_group_state(device.as_ref(), group)),
    )
    .await?;
    Ok(states.into_iter().collect())
}
