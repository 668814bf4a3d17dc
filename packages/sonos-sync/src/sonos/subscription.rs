//! Cancellable handles for per-group listeners and polling timers.
//!
//! Every listener or timer attached for a discovery session gets a
//! [`SubscriptionHandle`] backed by a child of the session token. Tearing a
//! session down is cancelling its [`SessionSubscriptions`].

use tokio_util::sync::CancellationToken;

/// Handle to one background listener or timer.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    label: String,
    token: CancellationToken,
}

impl SubscriptionHandle {
    pub fn new(label: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            label: label.into(),
            token,
        }
    }

    /// Description used in logs, e.g. `"Kitchen/volume"`.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Token the background task watches.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

/// All handles belonging to one discovery session.
#[derive(Debug)]
pub struct SessionSubscriptions {
    session: u64,
    token: CancellationToken,
    handles: Vec<SubscriptionHandle>,
}

impl SessionSubscriptions {
    /// Creates an empty set whose token is a child of `parent`.
    pub fn new(session: u64, parent: &CancellationToken) -> Self {
        Self {
            session,
            token: parent.child_token(),
            handles: Vec::new(),
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Creates and records a handle for a new listener or timer.
    pub fn register(&mut self, label: impl Into<String>) -> SubscriptionHandle {
        let handle = SubscriptionHandle::new(label, self.token.child_token());
        self.handles.push(handle.clone());
        handle
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Number of handles that have not been cancelled.
    pub fn active(&self) -> usize {
        self.handles.iter().filter(|h| h.is_active()).count()
    }

    /// Cancels every handle of the session. Returns how many were active.
    pub fn cancel_all(&self) -> usize {
        let active = self.active();
        self.token.cancel();
        active
    }
}
