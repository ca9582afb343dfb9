//! Durability layer for VersaDB
//!
//! This crate implements the shared durable store the engine talks to:
//! - Backend: the trait the engine consumes (change log, attribute history,
//!   class records, id allocation, server progress)
//! - MemoryBackend: in-process store, shareable between engines
//! - FileBackend: MemoryBackend plus an append-only CRC-framed log
//! - DurabilityMode: fsync policy of the file log

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod file;
pub mod memory;
pub mod mode;
pub mod wal;

pub use backend::{Backend, RowLock};
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use mode::DurabilityMode;
pub use wal::{LogRecord, LOG_FILE_NAME};
