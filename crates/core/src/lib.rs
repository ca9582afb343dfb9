//! Core types for VersaDB
//!
//! This crate defines the vocabulary shared by every layer:
//! - [`CommitNumber`], [`ClassId`], [`Oid`], [`ServerId`], [`SlotKey`]
//! - [`Value`]: the attribute value model
//! - Durable and wire records ([`ChangeLogRow`], [`ClassRecord`],
//!   [`CommitMessage`], [`ChangeSet`])
//! - [`Error`] and [`Result`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod records;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use records::{
    AttributeWrite, ChangeLogRow, ChangeSet, ClassRecord, CommitMessage, RelationChange,
    RelationTuple,
};
pub use types::{
    ClassId, CommitNumber, Oid, ServerId, SlotKey, DELETED_ATTRIBUTE, ROOT_CLASS_ID,
    ROOT_CLASS_NAME, ROOT_OID,
};
pub use value::Value;
