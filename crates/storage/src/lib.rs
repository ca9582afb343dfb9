//! Storage layer for VersaDB
//!
//! This crate holds the in-memory object graph:
//! - VersionedBox: per-attribute chain of committed versions
//! - DomainObject: the canonical instance of one persistent object
//! - IdentityMap: sharded oid → object map, one instance per oid
//! - ClassRegistry: class ids, schemas and object factories

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod identity;
pub mod object;
pub mod registry;
pub mod vbox;

pub use identity::IdentityMap;
pub use object::DomainObject;
pub use registry::{ClassEntry, ClassRegistry, ClassSchema, ObjectFactory};
pub use vbox::{VersionBody, VersionedBox};
