//! Versioned boxes
//!
//! A [`VersionedBox`] owns the committed history of one attribute slot as a
//! chain of [`VersionBody`] values ordered by commit number. A snapshot `N`
//! sees the body with the greatest number `<= N`.
//!
//! Bodies appended by alien replay carry no value yet ("not loaded"); the
//! first reader fills the body's write-once cell from the backend.
//!
//! # Thread Safety
//!
//! The chain sits behind a short `RwLock`. Hydration never holds it: readers
//! clone the `Arc<VersionBody>` out of the chain and fill the cell afterwards.

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::Arc;
use versa_core::{CommitNumber, Result, SlotKey, Value};

/// One committed version of a slot
#[derive(Debug)]
pub struct VersionBody {
    number: CommitNumber,
    value: OnceCell<Value>,
}

impl VersionBody {
    /// Body with a known value
    pub fn loaded(number: CommitNumber, value: Value) -> Self {
        Self {
            number,
            value: OnceCell::with_value(value),
        }
    }

    /// Body whose value must be fetched from the backend on first read
    pub fn not_loaded(number: CommitNumber) -> Self {
        Self {
            number,
            value: OnceCell::new(),
        }
    }

    /// Commit number that produced this body
    pub fn number(&self) -> CommitNumber {
        self.number
    }

    /// Value, if loaded
    pub fn value(&self) -> Option<&Value> {
        self.value.get()
    }

    /// True once the value is known
    pub fn is_loaded(&self) -> bool {
        self.value.get().is_some()
    }

    /// Return the value, running `load` to fill the cell if it is empty
    ///
    /// Concurrent callers race to fill the cell; exactly one value wins and
    /// every caller observes it.
    pub fn get_or_load<F>(&self, load: F) -> Result<&Value>
    where
        F: FnOnce() -> Result<Value>,
    {
        self.value.get_or_try_init(load)
    }
}

/// Version chain of one `(object, attribute)` slot
#[derive(Debug)]
pub struct VersionedBox {
    key: SlotKey,
    /// Ascending by commit number, never empty
    chain: RwLock<SmallVec<[Arc<VersionBody>; 2]>>,
}

impl VersionedBox {
    /// Create a box with a single not-loaded body at `base`
    ///
    /// The base body stands for all history up to the first body this
    /// process observes for the slot.
    pub fn new(key: SlotKey, base: CommitNumber) -> Self {
        let mut chain = SmallVec::new();
        chain.push(Arc::new(VersionBody::not_loaded(base)));
        Self {
            key,
            chain: RwLock::new(chain),
        }
    }

    /// Create a box whose first body already holds a value
    pub fn with_value(key: SlotKey, number: CommitNumber, value: Value) -> Self {
        let mut chain = SmallVec::new();
        chain.push(Arc::new(VersionBody::loaded(number, value)));
        Self {
            key,
            chain: RwLock::new(chain),
        }
    }

    /// Slot this box belongs to
    pub fn key(&self) -> &SlotKey {
        &self.key
    }

    /// Most recent body
    pub fn head(&self) -> Option<Arc<VersionBody>> {
        self.chain.read().last().cloned()
    }

    /// Commit number of the most recent body
    pub fn head_number(&self) -> CommitNumber {
        self.chain
            .read()
            .last()
            .map(|body| body.number())
            .unwrap_or(CommitNumber::ZERO)
    }

    /// Number of bodies currently retained
    pub fn len(&self) -> usize {
        self.chain.read().len()
    }

    /// Always false; a box keeps at least one body
    pub fn is_empty(&self) -> bool {
        self.chain.read().is_empty()
    }

    /// Body visible to `snapshot`
    ///
    /// Returns `None` when every retained body is newer than the snapshot,
    /// i.e. the history the snapshot needs has been trimmed.
    pub fn body_at(&self, snapshot: CommitNumber) -> Option<Arc<VersionBody>> {
        self.chain
            .read()
            .iter()
            .rev()
            .find(|body| body.number() <= snapshot)
            .cloned()
    }

    /// Append a body at `number`
    ///
    /// `None` appends a not-loaded body (alien replay). Returns `None` and
    /// leaves the chain untouched when `number` is not newer than the head,
    /// which makes replaying the same commit twice a no-op.
    pub fn append_version(
        &self,
        number: CommitNumber,
        value: Option<Value>,
    ) -> Option<Arc<VersionBody>> {
        let mut chain = self.chain.write();
        if chain.last().map_or(false, |head| number <= head.number()) {
            return None;
        }
        let body = Arc::new(match value {
            Some(value) => VersionBody::loaded(number, value),
            None => VersionBody::not_loaded(number),
        });
        chain.push(Arc::clone(&body));
        Some(body)
    }

    /// Drop bodies no snapshot `>= number` can see
    ///
    /// Keeps the body visible at `number` and everything newer. Returns the
    /// number of bodies dropped.
    pub fn trim_below(&self, number: CommitNumber) -> usize {
        let mut chain = self.chain.write();
        let Some(visible) = chain.iter().rposition(|body| body.number() <= number) else {
            return 0;
        };
        if visible > 0 {
            chain.drain(..visible);
        }
        visible
    }
}
