//! Change-log cleaner
//!
//! Every server records the newest commit it has processed. Rows below the
//! lowest recorded progress are no longer needed by any live server and are
//! pruned. The cleaner runs one pass per interval on a background thread.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use versa_concurrency::Timeline;
use versa_core::{Error, Result, ServerId};
use versa_durability::Backend;

/// Record this server's progress and prune what every server has passed
///
/// Returns the number of pruned rows.
pub fn clean_once(backend: &dyn Backend, timeline: &Timeline, server_id: ServerId) -> Result<usize> {
    let latest = timeline.latest_number();
    backend.record_server_progress(server_id, latest)?;
    let Some(floor) = backend.min_server_progress()? else {
        return Ok(0);
    };
    let pruned = backend.prune_change_log(floor)?;
    if pruned > 0 {
        debug!(server_id = %server_id, below = %floor, pruned, "Pruned change log");
    }
    Ok(pruned)
}

struct Shutdown {
    stopped: Mutex<bool>,
    signal: Condvar,
}

/// Background thread running [`clean_once`] periodically
pub struct ChangeLogCleaner {
    shutdown: Arc<Shutdown>,
    handle: Option<JoinHandle<()>>,
}

impl ChangeLogCleaner {
    /// Spawn the cleaner thread
    pub fn start(
        backend: Arc<dyn Backend>,
        timeline: Arc<Timeline>,
        server_id: ServerId,
        interval: Duration,
    ) -> Result<Self> {
        let shutdown = Arc::new(Shutdown {
            stopped: Mutex::new(false),
            signal: Condvar::new(),
        });
        let worker = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name(format!("versa-cleaner-{}", server_id))
            .spawn(move || {
                let mut stopped = worker.stopped.lock();
                while !*stopped {
                    worker.signal.wait_for(&mut stopped, interval);
                    if *stopped {
                        break;
                    }
                    if let Err(e) = clean_once(backend.as_ref(), &timeline, server_id) {
                        warn!(server_id = %server_id, error = %e, "Change-log cleaning failed");
                    }
                }
            })
            .map_err(|e| Error::Internal(format!("spawn cleaner thread: {}", e)))?;
        info!(server_id = %server_id, interval_secs = interval.as_secs(), "Change-log cleaner started");
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it; idempotent
    pub fn stop(&mut self) {
        {
            let mut stopped = self.shutdown.stopped.lock();
            *stopped = true;
            self.shutdown.signal.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Change-log cleaner thread panicked");
            }
            info!("Change-log cleaner stopped");
        }
    }

    /// True while the thread is running
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for ChangeLogCleaner {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ChangeLogCleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeLogCleaner")
            .field("running", &self.is_running())
            .finish()
    }
}
