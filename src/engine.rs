//! Engine context
//! --------------
//! One `Engine` per attached process. It owns the shared handle allocator, both
//! registry stores, the file table and the change bus, and exposes the calls the
//! interception layer makes. Registry calls are routed by the access policy:
//! transparent keys go to the transparent buffer, everything else to the
//! virtual store. A handle unknown to the virtual store is retried against the
//! transparent buffer before the call reports `InvalidHandle`.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::StateCode;
use crate::filesystem::{FileRequest, FileTableEntry, HostFileSystem, PathMapper, StdFileSystem, VirtualFileSystemTable};
use crate::hooks::{hook_table, HookInstaller};
use crate::index::{Handle, IndexAllocator};
use crate::persist::{FileTableDatabase, PersistentStore, RegistryDatabase};
use crate::policy::{AccessMechanism, AccessPolicy};
use crate::registry::path::{join_key_path, Hive, PREDEFINED_HANDLES};
use crate::registry::{HostRegistry, MemoryHostRegistry, TransparentResourceBuffer, VirtualKeyNode, VirtualRegistryStore, VirtualValue};
use crate::sync::{FlushReport, SyncBus};

const FINAL_FLUSH_RETRIES: usize = 20;

/// Host environment accessors.
#[derive(Clone)]
pub struct EngineHosts {
    pub registry: Arc<dyn HostRegistry>,
    pub files: Arc<dyn HostFileSystem>,
}

impl Default for EngineHosts {
    /// In-process registry and the real filesystem.
    fn default() -> Self { Self { registry: Arc::new(MemoryHostRegistry::new()), files: Arc::new(StdFileSystem) } }
}

/// The two persistent stores, one per resource kind.
#[derive(Clone)]
pub struct EngineStores {
    pub files: Arc<dyn PersistentStore<FileTableEntry>>,
    pub registry: Arc<dyn PersistentStore<VirtualKeyNode>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub files: usize,
    pub keys: usize,
}

/// Where a registry handle's operations go.
enum Route {
    /// A store handle: virtual store first, then the transparent buffer.
    Stored(Handle),
    /// A transparent predefined hive root, addressed on the host by path.
    Host(String),
}

pub struct Engine {
    config: EngineConfig,
    policy: AccessPolicy,
    allocator: Arc<IndexAllocator>,
    registry: VirtualRegistryStore,
    transparent: TransparentResourceBuffer,
    files: VirtualFileSystemTable,
    bus: Arc<SyncBus>,
    stores: EngineStores,
    host_registry: Arc<dyn HostRegistry>,
}

impl Engine {
    pub fn new(config: EngineConfig, hosts: EngineHosts, stores: EngineStores) -> Self {
        let policy = AccessPolicy::from_config(&config);
        let allocator = Arc::new(IndexAllocator::with_excluded([PREDEFINED_HANDLES]));
        let bus = SyncBus::new(stores.files.clone(), stores.registry.clone(), config.flush_interval(), config.flush_lock_timeout());
        let registry = VirtualRegistryStore::new(allocator.clone(), policy.clone(), hosts.registry.clone(), bus.clone());
        let transparent = TransparentResourceBuffer::new(allocator.clone(), hosts.registry.clone());
        let files = VirtualFileSystemTable::new(
            &config.virtual_root,
            policy.clone(),
            PathMapper::new(&config.folder_mappings),
            hosts.files.clone(),
            bus.clone(),
        );
        if config.auto_flush {
            bus.set_auto_flush(true);
        }
        info!(target: "appvirt::engine", "engine ready: virtual root {}, auto flush {}", files.root().display(), config.auto_flush);
        Self { config, policy, allocator, registry, transparent, files, bus, stores, host_registry: hosts.registry }
    }

    /// Engine backed by the file databases under `database_dir`.
    pub fn open(config: EngineConfig) -> Result<Self> { Self::open_with_hosts(config, EngineHosts::default()) }

    pub fn open_with_hosts(config: EngineConfig, hosts: EngineHosts) -> Result<Self> {
        std::fs::create_dir_all(&config.database_dir)
            .with_context(|| format!("create database dir: {}", config.database_dir.display()))?;
        let files = FileTableDatabase::open(&config.filesystem_db_path(), config.compact_after_batches)
            .context("open file table database")?;
        let registry = RegistryDatabase::open(&config.registry_db_path(), config.compact_after_batches)
            .context("open registry database")?;
        let stores = EngineStores { files: Arc::new(files), registry: Arc::new(registry) };
        Ok(Self::new(config, hosts, stores))
    }

    /// Hydrate both stores from the persistent stores. Emits no mutations.
    pub fn load_all(&self) -> Result<LoadReport> {
        let entries = self.stores.files.read_all().context("read file table")?;
        let nodes = self.stores.registry.read_all().context("read registry")?;
        let report = LoadReport { files: self.files.load(entries), keys: self.registry.load(nodes) };
        info!(target: "appvirt::engine", "loaded {} file entries, {} registry keys", report.files, report.keys);
        Ok(report)
    }

    pub fn flush_all(&self) -> FlushReport { self.bus.flush() }

    pub fn install_hooks(&self, installer: &mut dyn HookInstaller) -> Result<usize> {
        let table = hook_table();
        for hook in table {
            installer
                .install(hook)
                .with_context(|| format!("install hook {}!{}", hook.library, hook.symbol))?;
        }
        debug!(target: "appvirt::engine", "installed {} hooks", table.len());
        Ok(table.len())
    }

    // ----- filesystem -----

    pub fn resolve_file_request(&self, request: &FileRequest) -> FileTableEntry { self.files.resolve(request) }

    pub fn delete_file_entry(&self, entry: &FileTableEntry) -> usize { self.files.delete(entry) }

    pub fn lookup_file(&self, path: &str) -> Option<FileTableEntry> { self.files.lookup(path) }

    pub fn file_host_path(&self, entry: &FileTableEntry) -> std::path::PathBuf { self.files.host_path(entry) }

    // ----- registry -----

    /// Canonical path for a predefined hive handle or a live handle in either store.
    pub fn key_path(&self, handle: Handle) -> Option<String> {
        if let Some(hive) = Hive::from_predefined_handle(handle) {
            return Some(hive.name().to_string());
        }
        self.registry.path_of(handle).or_else(|| self.transparent.path_of(handle))
    }

    pub fn registry_open_key(&self, parent: Handle, sub_key: &str) -> (StateCode, Option<Handle>) {
        let Some(parent_path) = self.key_path(parent) else { return (StateCode::InvalidHandle, None) };
        let path = join_key_path(&parent_path, sub_key);
        let mechanism = self.policy.classify(&path);
        if mechanism == AccessMechanism::Transparent {
            return self.transparent.open_key(&path);
        }
        if let Some(h) = self.registry.open_key(&path) {
            return (StateCode::Success, Some(h));
        }
        if mechanism == AccessMechanism::Virtual {
            return (StateCode::NotFound, None);
        }
        // Not virtual yet: a key that exists on the host gets a virtual node.
        match self.host_registry.key_exists(&path) {
            Ok(true) => match self.registry.create_key(&path) {
                (st, Some(h)) if st.is_success() => (StateCode::Success, Some(h)),
                other => other,
            },
            Ok(false) => (StateCode::NotFound, None),
            Err(e) => (e.read_state(), None),
        }
    }

    pub fn registry_create_key(&self, parent: Handle, sub_key: &str) -> (StateCode, Option<Handle>) {
        let Some(parent_path) = self.key_path(parent) else { return (StateCode::InvalidHandle, None) };
        let path = join_key_path(&parent_path, sub_key);
        let mechanism = self.policy.classify(&path);
        if mechanism == AccessMechanism::Transparent {
            return self.transparent.create_key(&path);
        }
        let (st, h) = self.registry.create_key(&path);
        if st == StateCode::CreatedNew && mechanism != AccessMechanism::Virtual && matches!(self.host_registry.key_exists(&path), Ok(true)) {
            // The guest sees the key it would have opened on the host.
            return (StateCode::OpenedExisting, h);
        }
        (st, h)
    }

    fn route(&self, handle: Handle) -> Option<Route> {
        let Some(hive) = Hive::from_predefined_handle(handle) else { return Some(Route::Stored(handle)) };
        if self.policy.classify(hive.name()) == AccessMechanism::Transparent {
            return Some(Route::Host(hive.name().to_string()));
        }
        self.registry.create_key(hive.name()).1.map(Route::Stored)
    }

    pub fn registry_query_value(&self, handle: Handle, name: &str) -> (StateCode, Option<VirtualValue>) {
        match self.route(handle) {
            Some(Route::Stored(h)) => match self.registry.query_value(h, name) {
                (StateCode::InvalidHandle, _) => self.transparent.query_value(h, name),
                r => r,
            },
            Some(Route::Host(path)) => match self.host_registry.read_value(&path, name) {
                Ok(Some(v)) => (StateCode::Success, Some(v)),
                Ok(None) => (StateCode::NotFound, None),
                Err(e) => (e.read_state(), None),
            },
            None => (StateCode::InvalidHandle, None),
        }
    }

    pub fn registry_set_value(&self, handle: Handle, value: VirtualValue) -> StateCode {
        match self.route(handle) {
            Some(Route::Stored(h)) => {
                if self.registry.contains(h) {
                    return self.registry.set_value(h, value);
                }
                self.transparent.set_value(h, &value)
            }
            Some(Route::Host(path)) => match self.host_registry.write_value(&path, &value) {
                Ok(()) => StateCode::Success,
                Err(e) => e.write_state(),
            },
            None => StateCode::InvalidHandle,
        }
    }

    pub fn registry_delete_value(&self, handle: Handle, name: &str) -> StateCode {
        match self.route(handle) {
            Some(Route::Stored(h)) => match self.registry.delete_value(h, name) {
                StateCode::InvalidHandle => self.transparent.delete_value(h, name),
                st => st,
            },
            Some(Route::Host(path)) => match self.host_registry.delete_value(&path, name) {
                Ok(true) => StateCode::Success,
                Ok(false) => StateCode::NotFound,
                Err(e) => e.write_state(),
            },
            None => StateCode::InvalidHandle,
        }
    }

    /// Delete the key behind `handle` and its virtual subkeys. Hive roots cannot be deleted.
    pub fn registry_delete_key(&self, handle: Handle) -> StateCode {
        if Hive::from_predefined_handle(handle).is_some() {
            return StateCode::AccessDenied;
        }
        match self.registry.delete_key(handle) {
            StateCode::InvalidHandle => self.transparent.delete_key(handle),
            st => st,
        }
    }

    /// Close a handle. Virtual keys stay live until deleted, so closing one is a no-op.
    pub fn registry_close_key(&self, handle: Handle) -> StateCode {
        if Hive::from_predefined_handle(handle).is_some() || self.registry.contains(handle) {
            return StateCode::Success;
        }
        self.transparent.close_key(handle)
    }

    pub fn registry_enum_values(&self, handle: Handle) -> (StateCode, Vec<VirtualValue>) {
        let Some(Route::Stored(h)) = self.route(handle) else { return (StateCode::InvalidHandle, Vec::new()) };
        match self.registry.enum_values(h) {
            Some(values) => (StateCode::Success, values),
            None => (StateCode::InvalidHandle, Vec::new()),
        }
    }

    // ----- accessors -----

    pub fn config(&self) -> &EngineConfig { &self.config }

    pub fn policy(&self) -> &AccessPolicy { &self.policy }

    pub fn allocator(&self) -> &Arc<IndexAllocator> { &self.allocator }

    pub fn registry(&self) -> &VirtualRegistryStore { &self.registry }

    pub fn transparent(&self) -> &TransparentResourceBuffer { &self.transparent }

    pub fn files(&self) -> &VirtualFileSystemTable { &self.files }

    pub fn bus(&self) -> &Arc<SyncBus> { &self.bus }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.bus.set_auto_flush(false);
        let mut report = self.bus.flush();
        // The flush worker may still hold a queue's gate for its last batch.
        for _ in 0..FINAL_FLUSH_RETRIES {
            if report.skipped == 0 { break; }
            report = self.bus.flush();
        }
        if report.failed > 0 || report.skipped > 0 {
            warn!(target: "appvirt::engine", "final flush incomplete: {} failed, {} skipped", report.failed, report.skipped);
        } else {
            debug!(target: "appvirt::engine", "final flush: fs={} registry={}", report.filesystem, report.registry);
        }
    }
}

#[cfg(test)]
#[path = "engine/engine_tests.rs"]
mod engine_tests;
