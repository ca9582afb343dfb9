//! In-process coordinator
//!
//! [`LocalCluster`] lets several engines of one process behave like the
//! members of a cluster. Broadcasts are delivered synchronously to every
//! subscriber, including the publisher's own handler.

use crate::coordinator::{ClusterCoordinator, MessageHandler, SubscriptionId};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use versa_core::{CommitMessage, Error, Result, ServerId};

/// In-process [`ClusterCoordinator`]
pub struct LocalCluster {
    next_server: AtomicU32,
    started: Mutex<bool>,
    started_cv: Condvar,
    locked: Mutex<bool>,
    lock_cv: Condvar,
    subscribers: RwLock<Vec<(SubscriptionId, MessageHandler)>>,
    /// When false, publishes are accepted but not delivered
    deliver: AtomicBool,
    published: AtomicU64,
}

impl LocalCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self {
            next_server: AtomicU32::new(0),
            started: Mutex::new(false),
            started_cv: Condvar::new(),
            locked: Mutex::new(false),
            lock_cv: Condvar::new(),
            subscribers: RwLock::new(Vec::new()),
            deliver: AtomicBool::new(true),
            published: AtomicU64::new(0),
        }
    }

    /// Stop or resume delivering broadcasts
    ///
    /// Lets tests simulate lost messages (a peer that crashed after
    /// persisting but before broadcasting).
    pub fn set_delivery(&self, enabled: bool) {
        self.deliver.store(enabled, Ordering::SeqCst);
    }

    /// Number of messages published so far
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Number of active subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// True while some member holds the commit lock
    pub fn is_locked(&self) -> bool {
        *self.locked.lock()
    }
}

impl Default for LocalCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterCoordinator for LocalCluster {
    fn allocate_server_id(&self) -> Result<ServerId> {
        let id = ServerId::new(self.next_server.fetch_add(1, Ordering::SeqCst));
        info!(server_id = %id, "Server joined local cluster");
        Ok(id)
    }

    fn notify_startup_complete(&self) -> Result<()> {
        let mut started = self.started.lock();
        *started = true;
        self.started_cv.notify_all();
        Ok(())
    }

    fn wait_for_startup(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut started = self.started.lock();
        while !*started {
            if self.started_cv.wait_until(&mut started, deadline).timed_out() && !*started {
                return Err(Error::ReplicationStall(format!(
                    "startup barrier not released after {:?}",
                    timeout
                )));
            }
        }
        Ok(())
    }

    fn lock(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut locked = self.locked.lock();
        while *locked {
            if self.lock_cv.wait_until(&mut locked, deadline).timed_out() && *locked {
                return Err(Error::ReplicationStall(format!(
                    "cluster lock not acquired after {:?}",
                    timeout
                )));
            }
        }
        *locked = true;
        Ok(())
    }

    fn unlock(&self) -> Result<()> {
        let mut locked = self.locked.lock();
        if !*locked {
            return Err(Error::Internal("cluster lock is not held".to_string()));
        }
        *locked = false;
        self.lock_cv.notify_one();
        Ok(())
    }

    fn publish(&self, message: CommitMessage) -> Result<()> {
        self.published.fetch_add(1, Ordering::SeqCst);
        if !self.deliver.load(Ordering::SeqCst) {
            debug!(commit_number = message.commit_number, "Dropping broadcast");
            return Ok(());
        }
        let handlers: Vec<MessageHandler> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(&message);
        }
        Ok(())
    }

    fn subscribe(&self, handler: MessageHandler) -> Result<SubscriptionId> {
        let id = SubscriptionId::new();
        self.subscribers.write().push((id, handler));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.subscribers.write().retain(|(existing, _)| *existing != id);
        Ok(())
    }
}

impl std::fmt::Debug for LocalCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCluster")
            .field("servers", &self.next_server.load(Ordering::SeqCst))
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
