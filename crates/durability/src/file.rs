//! File backend
//!
//! A [`MemoryBackend`] whose mutations are first appended to the
//! `changes.log` file of a data directory. Opening the directory replays the
//! log; a torn or corrupt tail is logged and truncated away.
//!
//! Server progress is kept in memory only: it describes live processes and
//! is rebuilt by their cleaners after a restart.

use crate::backend::{Backend, RowLock};
use crate::memory::MemoryBackend;
use crate::mode::DurabilityMode;
use crate::wal::{read_records, write_record, LogRecord, LOG_FILE_NAME};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use versa_core::{
    ChangeLogRow, ChangeSet, ClassId, ClassRecord, CommitNumber, Error, Oid, Result, ServerId,
    Value,
};

struct LogWriter {
    file: File,
    /// Records appended since the last fsync
    pending: usize,
}

/// Durable backend over an append-only log file
pub struct FileBackend {
    path: PathBuf,
    mode: DurabilityMode,
    inner: MemoryBackend,
    /// Serializes append-then-apply so the log order matches memory
    log: Mutex<LogWriter>,
}

impl FileBackend {
    /// Open (or create) the store in `dir`
    pub fn open(dir: impl AsRef<Path>, mode: DurabilityMode) -> Result<Self> {
        let dir = dir.as_ref();
        check_data_dir(dir)?;
        fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILE_NAME);

        let inner = MemoryBackend::new();
        let mut recovered = 0usize;
        if path.exists() {
            let data = fs::read(&path)?;
            let scan = read_records(&data);
            if let Some(reason) = &scan.torn {
                warn!(
                    path = %path.display(),
                    valid_len = scan.valid_len,
                    file_len = data.len(),
                    reason = %reason,
                    "Truncating torn log tail"
                );
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(scan.valid_len)?;
                file.sync_all()?;
            }
            recovered = scan.records.len();
            for record in &scan.records {
                replay(&inner, record);
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(
            path = %path.display(),
            records = recovered,
            commit_number = %inner.max_commit_number()?,
            mode = mode.description(),
            "Opened file backend"
        );
        Ok(Self {
            path,
            mode,
            inner,
            log: Mutex::new(LogWriter { file, pending: 0 }),
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured fsync policy
    pub fn mode(&self) -> DurabilityMode {
        self.mode
    }

    /// In-memory view of the recovered store
    pub fn memory(&self) -> &MemoryBackend {
        &self.inner
    }

    fn append(&self, writer: &mut LogWriter, record: &LogRecord) -> Result<()> {
        let mut buf = Vec::new();
        write_record(&mut buf, record)?;
        writer.file.write_all(&buf)?;
        writer.pending += 1;
        if self.mode.should_sync(writer.pending) {
            writer.file.sync_data()?;
            writer.pending = 0;
        }
        Ok(())
    }
}

fn replay(inner: &MemoryBackend, record: &LogRecord) {
    match record {
        LogRecord::ChangeSet(change_set) => match inner.check_commit(change_set) {
            Ok(()) => inner.apply_change_set(change_set),
            Err(e) => warn!(
                commit_number = %change_set.commit_number,
                error = %e,
                "Skipping out-of-order commit during recovery"
            ),
        },
        LogRecord::Class(record) => {
            inner.apply_class_record(record);
        }
        LogRecord::InternalId { class_id, id } => inner.observe_internal_id(*class_id, *id),
        LogRecord::Prune { below } => {
            inner.apply_prune(*below);
        }
    }
}

impl Backend for FileBackend {
    fn load_attribute(&self, oid: Oid, attribute: &str, as_of: CommitNumber) -> Result<Option<Value>> {
        self.inner.load_attribute(oid, attribute, as_of)
    }

    fn persist_change_set(&self, change_set: &ChangeSet) -> Result<()> {
        let mut writer = self.log.lock();
        self.inner.check_commit(change_set)?;
        self.append(&mut writer, &LogRecord::ChangeSet(change_set.clone()))?;
        self.inner.apply_change_set(change_set);
        Ok(())
    }

    fn query_change_log_since(&self, after: CommitNumber, lock: RowLock) -> Result<Vec<ChangeLogRow>> {
        self.inner.query_change_log_since(after, lock)
    }

    fn max_commit_number(&self) -> Result<CommitNumber> {
        self.inner.max_commit_number()
    }

    fn load_class_records(&self) -> Result<Vec<ClassRecord>> {
        self.inner.load_class_records()
    }

    fn insert_class_record(&self, record: &ClassRecord) -> Result<bool> {
        let mut writer = self.log.lock();
        let taken = self.inner.load_class_records()?.iter().any(|existing| {
            existing.class_id == record.class_id || existing.class_name == record.class_name
        });
        if taken {
            return Ok(false);
        }
        self.append(&mut writer, &LogRecord::Class(record.clone()))?;
        Ok(self.inner.apply_class_record(record))
    }

    fn next_internal_id(&self, class_id: ClassId) -> Result<u32> {
        let mut writer = self.log.lock();
        let id = self.inner.next_internal_id(class_id)?;
        self.append(&mut writer, &LogRecord::InternalId { class_id, id })?;
        Ok(id)
    }

    fn contains_object(&self, oid: Oid) -> Result<bool> {
        self.inner.contains_object(oid)
    }

    fn deleted_at(&self, oid: Oid) -> Result<Option<CommitNumber>> {
        self.inner.deleted_at(oid)
    }

    fn record_server_progress(&self, server: ServerId, number: CommitNumber) -> Result<()> {
        self.inner.record_server_progress(server, number)
    }

    fn remove_server_progress(&self, server: ServerId) -> Result<()> {
        self.inner.remove_server_progress(server)
    }

    fn min_server_progress(&self) -> Result<Option<CommitNumber>> {
        self.inner.min_server_progress()
    }

    fn prune_change_log(&self, below: CommitNumber) -> Result<usize> {
        let mut writer = self.log.lock();
        self.append(&mut writer, &LogRecord::Prune { below })?;
        Ok(self.inner.apply_prune(below))
    }

    fn flush(&self) -> Result<()> {
        let mut writer = self.log.lock();
        writer.file.flush()?;
        writer.file.sync_data()?;
        writer.pending = 0;
        Ok(())
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        let writer = self.log.get_mut();
        if writer.pending > 0 {
            if let Err(e) = writer.file.sync_data() {
                warn!(path = %self.path.display(), error = %e, "Final log sync failed");
            }
        }
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Reject a data directory path that exists but is not a directory
pub fn check_data_dir(dir: &Path) -> Result<()> {
    if dir.exists() && !dir.is_dir() {
        return Err(Error::Config(format!(
            "data directory {} is not a directory",
            dir.display()
        )));
    }
    Ok(())
}
