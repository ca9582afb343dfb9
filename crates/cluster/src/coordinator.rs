//! Coordinator trait

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use versa_core::{CommitMessage, Result, ServerId};

/// Callback invoked for every broadcast commit
pub type MessageHandler = Arc<dyn Fn(&CommitMessage) + Send + Sync>;

/// Handle returned by [`ClusterCoordinator::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id
    pub fn new() -> Self {
        SubscriptionId(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cross-process coordination service
///
/// Lock timeouts and unreachable peers surface as
/// [`Error::ReplicationStall`](versa_core::Error::ReplicationStall).
pub trait ClusterCoordinator: Send + Sync {
    /// Join the cluster; the first caller gets server id 0
    fn allocate_server_id(&self) -> Result<ServerId>;

    /// Release the startup barrier (called by server 0 after bootstrap)
    fn notify_startup_complete(&self) -> Result<()>;

    /// Block until server 0 has released the startup barrier
    fn wait_for_startup(&self, timeout: Duration) -> Result<()>;

    /// Acquire the cluster-wide commit lock
    fn lock(&self, timeout: Duration) -> Result<()>;

    /// Release the cluster-wide commit lock
    fn unlock(&self) -> Result<()>;

    /// Broadcast a commit to every subscriber
    fn publish(&self, message: CommitMessage) -> Result<()>;

    /// Register a broadcast handler
    fn subscribe(&self, handler: MessageHandler) -> Result<SubscriptionId>;

    /// Remove a broadcast handler
    fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}
