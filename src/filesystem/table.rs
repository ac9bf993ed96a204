//! Virtual filesystem table
//! ------------------------
//! Maps requested paths to redirected paths under the virtual root. Entries
//! are created when the guest intends to create something; lookups for things
//! that only exist on the host pass through unchanged. All state sits behind a
//! single reader/writer lock; the only host call made while it is held is the
//! existence check used to pick a unique redirect target.

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use path_absolutize::Absolutize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::filesystem::host::HostFileSystem;
use crate::filesystem::mapping::{with_suffix, PathMapper};
use crate::filesystem::types::{FileKind, FileRequest, FileTableEntry, ResourceKind};
use crate::persist::DatabaseAction;
use crate::policy::{fold_path, has_folded_prefix, AccessPolicy};
use crate::sync::{Mutation, SyncBus};

pub struct VirtualFileSystemTable {
    /// Folded request path -> entry.
    entries: RwLock<HashMap<String, FileTableEntry>>,
    root: PathBuf,
    policy: AccessPolicy,
    mapper: PathMapper,
    host: Arc<dyn HostFileSystem>,
    bus: Arc<SyncBus>,
}

impl VirtualFileSystemTable {
    pub fn new(root: &Path, policy: AccessPolicy, mapper: PathMapper, host: Arc<dyn HostFileSystem>, bus: Arc<SyncBus>) -> Self {
        let root = root.absolutize().map(|p| p.to_path_buf()).unwrap_or_else(|_| root.to_path_buf());
        Self { entries: RwLock::new(HashMap::new()), root, policy, mapper, host, bus }
    }

    pub fn root(&self) -> &Path { &self.root }

    /// Hydrate from persisted entries without emitting mutations.
    pub fn load(&self, entries: Vec<FileTableEntry>) -> usize {
        let mut w = self.entries.write();
        let before = w.len();
        for e in entries {
            w.insert(fold_path(&e.key), e);
        }
        let loaded = w.len() - before;
        debug!(target: "appvirt::files", "loaded {} file table entries", loaded);
        loaded
    }

    pub fn resolve(&self, req: &FileRequest) -> FileTableEntry {
        let path = req.lookup_path();
        let kind = req.kind.file_kind();
        if !self.policy.is_virtualizable(path) || self.policy.is_temporary(path) {
            trace!(target: "appvirt::files", "pass through {}", path);
            return FileTableEntry::passthrough(path, kind);
        }
        let id = fold_path(path);
        if let Some(e) = self.entries.read().get(&id) {
            return e.clone();
        }
        if req.kind == ResourceKind::Library {
            return self.resolve_library(path);
        }
        if !req.disposition.may_create() {
            return FileTableEntry::passthrough(path, kind);
        }
        let entry = {
            let up = self.entries.upgradable_read();
            if let Some(e) = up.get(&id) {
                return e.clone();
            }
            let value = self.unique_value(&up, self.mapper.map(path));
            let entry = FileTableEntry::new(path, value, kind);
            let mut w = RwLockUpgradableReadGuard::upgrade(up);
            w.insert(id, entry.clone());
            self.bus.enqueue(Mutation::FileSystem(DatabaseAction::add(entry.clone())));
            entry
        };
        debug!(target: "appvirt::files", "redirect {} -> {}", entry.key, entry.value);
        if let Some(parent) = self.host_path(&entry).parent() {
            if let Err(e) = self.host.create_dir_all(parent) {
                warn!(target: "appvirt::files", "could not create {}: {}", parent.display(), e);
            }
        }
        entry
    }

    /// Libraries are never created; a mapped copy is used only if it exists.
    fn resolve_library(&self, path: &str) -> FileTableEntry {
        let mapped = self.mapper.map(path);
        if self.host.exists(&self.to_host(&mapped)) {
            trace!(target: "appvirt::files", "library {} found at {}", path, mapped);
            return FileTableEntry::new(path, mapped, FileKind::File);
        }
        FileTableEntry::passthrough(path, FileKind::File)
    }

    fn unique_value(&self, entries: &HashMap<String, FileTableEntry>, candidate: String) -> String {
        let taken = |v: &str| {
            let folded = fold_path(v);
            self.host.exists(&self.to_host(v)) || entries.values().any(|e| fold_path(&e.value) == folded)
        };
        if !taken(&candidate) {
            return candidate;
        }
        let mut n = 1u32;
        loop {
            let next = with_suffix(&candidate, n);
            if !taken(&next) {
                return next;
            }
            n += 1;
        }
    }

    /// Remove an entry. Directories take every entry below their redirect
    /// target with them. Returns the number of entries removed.
    pub fn delete(&self, entry: &FileTableEntry) -> usize {
        let id = fold_path(&entry.key);
        let mut w = self.entries.write();
        let Some(stored) = w.remove(&id) else { return 0 };
        let is_dir = stored.kind == FileKind::Directory || entry.kind == FileKind::Directory;
        let dir_value = fold_path(&stored.value);
        self.bus.enqueue(Mutation::FileSystem(DatabaseAction::remove(stored)));
        let mut removed = 1;
        if is_dir {
            let doomed: Vec<String> = w
                .iter()
                .filter(|(_, e)| has_folded_prefix(&fold_path(&e.value), &dir_value))
                .map(|(k, _)| k.clone())
                .collect();
            for k in doomed {
                if let Some(e) = w.remove(&k) {
                    self.bus.enqueue(Mutation::FileSystem(DatabaseAction::remove(e)));
                    removed += 1;
                }
            }
        }
        debug!(target: "appvirt::files", "deleted {} ({} entries)", entry.key, removed);
        removed
    }

    pub fn lookup(&self, path: &str) -> Option<FileTableEntry> { self.entries.read().get(&fold_path(path)).cloned() }

    /// Where the entry lives on the host: under the virtual root if
    /// redirected, else the requested path itself.
    pub fn host_path(&self, entry: &FileTableEntry) -> PathBuf {
        if entry.is_redirected() { self.to_host(&entry.value) } else { PathBuf::from(&entry.key) }
    }

    fn to_host(&self, value: &str) -> PathBuf {
        let mut p = self.root.clone();
        for c in value.split(['\\', '/']).filter(|s| !s.is_empty()) {
            p.push(c);
        }
        p
    }

    /// Snapshot of all entries, ordered by key.
    pub fn entries(&self) -> Vec<FileTableEntry> {
        let mut v: Vec<FileTableEntry> = self.entries.read().values().cloned().collect();
        v.sort_by(|a, b| a.key.cmp(&b.key));
        v
    }

    pub fn len(&self) -> usize { self.entries.read().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
#[path = "table_tests.rs"]
mod table_tests;
