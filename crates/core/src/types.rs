//! Identifier types
//!
//! - [`CommitNumber`]: position of a commit in the global total order
//! - [`ClassId`]: small integer naming a domain class
//! - [`Oid`]: 64-bit object identifier, `(class_id << 32) | internal_id`
//! - [`ServerId`]: cluster-assigned process number
//! - [`SlotKey`]: one attribute of one object

use serde::{Deserialize, Serialize};
use std::fmt;

/// Commit number of a transaction
///
/// Commit numbers are the sole happens-before marker between transactions.
/// They are strictly increasing across the whole cluster; `ZERO` is the
/// number of an empty store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct CommitNumber(u32);

impl CommitNumber {
    /// Number of an empty store
    pub const ZERO: CommitNumber = CommitNumber(0);

    /// Wrap a raw commit number
    pub const fn new(raw: u32) -> Self {
        CommitNumber(raw)
    }

    /// Raw value
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The following commit number, or `None` when the number space is exhausted
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(CommitNumber)
    }

    /// The preceding commit number, saturating at zero
    pub fn prev(self) -> Self {
        CommitNumber(self.0.saturating_sub(1))
    }
}

impl fmt::Display for CommitNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CommitNumber {
    fn from(raw: u32) -> Self {
        CommitNumber(raw)
    }
}

/// Stable identifier of a domain class
///
/// Ids are assigned once per deployment and never reused. Id 0 belongs to
/// the root class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassId(u32);

impl ClassId {
    /// Wrap a raw class id
    pub const fn new(raw: u32) -> Self {
        ClassId(raw)
    }

    /// Raw value
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Class id of the persistent root
pub const ROOT_CLASS_ID: ClassId = ClassId(0);

/// Class name of the persistent root
pub const ROOT_CLASS_NAME: &str = "PersistentRoot";

/// Attribute slot that marks an object as deleted
pub const DELETED_ATTRIBUTE: &str = "$deleted";

/// Object identifier
///
/// The upper 32 bits carry the [`ClassId`], the lower 32 bits a per-class
/// internal id. `Oid(0)` is the change-log padding marker and never names
/// an object.
///
/// # Examples
///
/// ```
/// use versa_core::{ClassId, Oid};
///
/// let oid = Oid::new(ClassId::new(7), 42);
/// assert_eq!(oid.raw(), (7u64 << 32) | 42);
/// assert_eq!(oid.class_id(), ClassId::new(7));
/// assert_eq!(oid.internal_id(), 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Oid(u64);

impl Oid {
    /// Padding marker used by commits that change no attribute
    pub const PADDING: Oid = Oid(0);

    /// Compose an oid from its class and internal id
    pub const fn new(class_id: ClassId, internal_id: u32) -> Self {
        Oid(((class_id.0 as u64) << 32) | internal_id as u64)
    }

    /// Wrap a raw 64-bit identifier
    pub const fn from_raw(raw: u64) -> Self {
        Oid(raw)
    }

    /// Raw 64-bit identifier
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Class component
    pub const fn class_id(self) -> ClassId {
        ClassId((self.0 >> 32) as u32)
    }

    /// Per-class component
    pub const fn internal_id(self) -> u32 {
        self.0 as u32
    }

    /// True for the padding marker
    pub const fn is_padding(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class_id(), self.internal_id())
    }
}

/// Oid of the well-known root object
pub const ROOT_OID: Oid = Oid::new(ROOT_CLASS_ID, 1);

/// Cluster-assigned process number; the first process to join gets 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ServerId(u32);

impl ServerId {
    /// Wrap a raw server id
    pub const fn new(raw: u32) -> Self {
        ServerId(raw)
    }

    /// Raw value
    pub const fn get(self) -> u32 {
        self.0
    }

    /// True for the bootstrap server
    pub const fn is_first(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One attribute of one object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    /// Owning object
    pub oid: Oid,
    /// Attribute name
    pub attribute: String,
}

impl SlotKey {
    /// Create a slot key
    pub fn new(oid: Oid, attribute: impl Into<String>) -> Self {
        Self {
            oid,
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.oid, self.attribute)
    }
}
