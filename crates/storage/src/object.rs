//! Domain objects
//!
//! A [`DomainObject`] is the canonical in-memory instance of one persistent
//! object. It owns one [`VersionedBox`] per attribute, created on first use.

use crate::vbox::VersionedBox;
use dashmap::DashMap;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;
use std::sync::Arc;
use versa_core::{ClassId, CommitNumber, Oid, SlotKey};

/// Canonical instance of a persistent object
#[derive(Debug)]
pub struct DomainObject {
    oid: Oid,
    /// Base number for boxes created lazily on this instance
    base: CommitNumber,
    slots: DashMap<String, Arc<VersionedBox>, BuildHasherDefault<FxHasher>>,
}

impl DomainObject {
    /// Create an instance with no materialized slots
    pub fn new(oid: Oid, base: CommitNumber) -> Self {
        Self {
            oid,
            base,
            slots: DashMap::with_hasher(BuildHasherDefault::default()),
        }
    }

    /// Create an instance with boxes for the declared attributes
    pub fn with_attributes<I, S>(oid: Oid, base: CommitNumber, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let object = Self::new(oid, base);
        for attribute in attributes {
            object.slot(attribute.into());
        }
        object
    }

    /// Object identifier
    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// Class of this object
    pub fn class_id(&self) -> ClassId {
        self.oid.class_id()
    }

    /// Box of `attribute`, creating it if this instance has not seen it yet
    pub fn slot(&self, attribute: impl Into<String>) -> Arc<VersionedBox> {
        let attribute = attribute.into();
        if let Some(existing) = self.slots.get(&attribute) {
            return Arc::clone(existing.value());
        }
        let key = SlotKey::new(self.oid, attribute.clone());
        let base = self.base;
        Arc::clone(
            self.slots
                .entry(attribute)
                .or_insert_with(|| Arc::new(VersionedBox::new(key, base)))
                .value(),
        )
    }

    /// Box of `attribute` if already materialized
    pub fn existing_slot(&self, attribute: &str) -> Option<Arc<VersionedBox>> {
        self.slots.get(attribute).map(|entry| Arc::clone(entry.value()))
    }

    /// Names of the materialized slots, sorted
    pub fn slot_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}
