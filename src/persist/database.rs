//! File-backed persistent stores for the file table and the registry.

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::filesystem::types::FileTableEntry;
use crate::persist::log::{LogKind, RecordLog};
use crate::persist::rows::{FileBatch, RegistryBatch};
use crate::persist::{replay, DatabaseAction, Keyed, PersistentStore};
use crate::registry::types::VirtualKeyNode;

/// Shared shape of both databases: a record log of batches of some row type.
struct BatchLog<B> {
    log: Mutex<RecordLog<B>>,
    kind: LogKind,
}

impl<B: serde::Serialize + serde::de::DeserializeOwned> BatchLog<B> {
    fn open(path: &Path, kind: LogKind) -> Result<Self> {
        Ok(Self { log: Mutex::new(RecordLog::open(path, kind)?), kind })
    }

    fn read_batches(&self) -> Result<Vec<B>> {
        let g = self.log.lock();
        RecordLog::<B>::read_all(g.path(), self.kind)
    }
}

fn fold<T: Keyed + Clone>(batches: impl IntoIterator<Item = Vec<DatabaseAction<T>>>) -> Vec<T> {
    let mut state = BTreeMap::new();
    for b in batches { replay(&mut state, &b); }
    state.into_values().collect()
}

pub struct FileTableDatabase {
    inner: BatchLog<FileBatch>,
}

impl FileTableDatabase {
    /// Open the log at `path`, compacting it into one snapshot record when it
    /// holds more than `compact_after` batches.
    pub fn open(path: &Path, compact_after: usize) -> Result<Self> {
        let db = Self { inner: BatchLog::open(path, LogKind::FileTable)? };
        if db.inner.log.lock().record_count() > compact_after { db.compact()?; }
        Ok(db)
    }

    pub fn compact(&self) -> Result<()> {
        let entries = self.read_all()?;
        let snapshot = FileBatch::from_actions(&entries.into_iter().map(DatabaseAction::add).collect::<Vec<_>>());
        let mut g = self.inner.log.lock();
        let before = g.record_count();
        g.rewrite(std::slice::from_ref(&snapshot))?;
        info!(target: "appvirt::persist", "compacted file table log {} ({} batches -> 1)", g.path().display(), before);
        Ok(())
    }

    pub fn batch_count(&self) -> usize { self.inner.log.lock().record_count() }
}

impl PersistentStore<FileTableEntry> for FileTableDatabase {
    fn enqueue(&self, batch: Vec<DatabaseAction<FileTableEntry>>) -> Result<()> {
        if batch.is_empty() { return Ok(()); }
        let rec = FileBatch::from_actions(&batch);
        self.inner.log.lock().append(&rec)?;
        debug!(target: "appvirt::persist", "file table batch persisted: {} actions", batch.len());
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<FileTableEntry>> {
        Ok(fold(self.inner.read_batches()?.into_iter().map(FileBatch::into_actions)))
    }
}

pub struct RegistryDatabase {
    inner: BatchLog<RegistryBatch>,
}

impl RegistryDatabase {
    pub fn open(path: &Path, compact_after: usize) -> Result<Self> {
        let db = Self { inner: BatchLog::open(path, LogKind::Registry)? };
        if db.inner.log.lock().record_count() > compact_after { db.compact()?; }
        Ok(db)
    }

    pub fn compact(&self) -> Result<()> {
        let nodes = self.read_all()?;
        let snapshot = RegistryBatch::from_actions(&nodes.into_iter().map(DatabaseAction::add).collect::<Vec<_>>());
        let mut g = self.inner.log.lock();
        let before = g.record_count();
        g.rewrite(std::slice::from_ref(&snapshot))?;
        info!(target: "appvirt::persist", "compacted registry log {} ({} batches -> 1)", g.path().display(), before);
        Ok(())
    }

    pub fn batch_count(&self) -> usize { self.inner.log.lock().record_count() }
}

impl PersistentStore<VirtualKeyNode> for RegistryDatabase {
    fn enqueue(&self, batch: Vec<DatabaseAction<VirtualKeyNode>>) -> Result<()> {
        if batch.is_empty() { return Ok(()); }
        let rec = RegistryBatch::from_actions(&batch);
        self.inner.log.lock().append(&rec)?;
        debug!(target: "appvirt::persist", "registry batch persisted: {} actions", batch.len());
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<VirtualKeyNode>> {
        Ok(fold(self.inner.read_batches()?.into_iter().map(RegistryBatch::into_actions)))
    }
}
