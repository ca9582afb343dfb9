//! Identity map
//!
//! Guarantees a single canonical [`DomainObject`] per oid. Lookups are
//! lock-free reads on a sharded `DashMap`; first materialization goes
//! through the entry API so concurrent callers agree on one instance.
//!
//! # Eviction
//!
//! [`IdentityMap::evict`] is a hook for an external memory policy. An
//! evicted object loses the version history the process had observed, so
//! instances materialized afterwards start their boxes at the eviction
//! point and older snapshots get `VersionUnavailable` for them.

use crate::object::DomainObject;
use dashmap::DashMap;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use versa_core::{CommitNumber, Oid};

/// Sharded oid → object map
#[derive(Debug)]
pub struct IdentityMap {
    objects: DashMap<Oid, Arc<DomainObject>, BuildHasherDefault<FxHasher>>,
    /// Highest commit number at which an object was evicted
    floor: AtomicU32,
}

impl IdentityMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self {
            objects: DashMap::with_hasher(BuildHasherDefault::default()),
            floor: AtomicU32::new(0),
        }
    }

    /// Base commit number for newly materialized instances
    #[inline]
    pub fn base(&self) -> CommitNumber {
        CommitNumber::new(self.floor.load(Ordering::Acquire))
    }

    /// Canonical instance, if materialized
    pub fn get(&self, oid: Oid) -> Option<Arc<DomainObject>> {
        self.objects.get(&oid).map(|entry| Arc::clone(entry.value()))
    }

    /// Canonical instance, materializing it with `allocate` on first access
    ///
    /// `allocate` runs at most once per oid even under concurrent first
    /// access; losers of the race get the winner's instance.
    pub fn get_or_allocate<F>(&self, oid: Oid, allocate: F) -> Arc<DomainObject>
    where
        F: FnOnce(Oid, CommitNumber) -> DomainObject,
    {
        if let Some(existing) = self.objects.get(&oid) {
            return Arc::clone(existing.value());
        }
        let base = self.base();
        Arc::clone(
            self.objects
                .entry(oid)
                .or_insert_with(|| Arc::new(allocate(oid, base)))
                .value(),
        )
    }

    /// Drop the canonical instance of `oid`
    ///
    /// `at` is the commit number the process has caught up to.
    pub fn evict(&self, oid: Oid, at: CommitNumber) -> bool {
        let removed = self.objects.remove(&oid).is_some();
        if removed {
            self.floor.fetch_max(at.get(), Ordering::AcqRel);
            tracing::debug!(oid = %oid, commit_number = %at, "Evicted object");
        }
        removed
    }

    /// Number of materialized objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when nothing is materialized
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for IdentityMap {
    fn default() -> Self {
        Self::new()
    }
}
