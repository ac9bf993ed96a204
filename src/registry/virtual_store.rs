//! Handle -> key node store for virtualized registry keys.
//!
//! Keys are created on first virtualized access or explicit create, mutated in
//! place, and removed only by delete; they are never closed. Every mutation is
//! pushed onto the sync bus from inside the write section so the queued order
//! matches the order mutations were applied. The bus never calls back into a
//! store, so this cannot deadlock.

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::error::StateCode;
use crate::index::{Handle, IndexAllocator, IndexConsumer};
use crate::persist::DatabaseAction;
use crate::policy::{AccessMechanism, AccessPolicy};
use crate::registry::host::HostRegistry;
use crate::registry::path::{canonical_key_path, is_same_or_descendant};
use crate::registry::types::{VirtualKeyNode, VirtualValue};
use crate::sync::{Mutation, SyncBus};

struct KeyEntry {
    node: VirtualKeyNode,
    /// Lowercased canonical path, for case-insensitive lookups.
    path_id: String,
    mechanism: AccessMechanism,
}

#[derive(Default)]
struct KeyTable {
    keys: RwLock<HashMap<Handle, KeyEntry>>,
}

impl IndexConsumer for KeyTable {
    fn is_index_in_use(&self, index: Handle) -> bool {
        // Recursive: allocation happens while this thread holds an upgradable read.
        self.keys.read_recursive().contains_key(&index)
    }
}

/// Linear scan; the number of live keys per process is small.
fn find_by_path(keys: &HashMap<Handle, KeyEntry>, path_id: &str) -> Option<Handle> {
    keys.iter().find(|(_, e)| e.path_id == path_id).map(|(h, _)| *h)
}

pub struct VirtualRegistryStore {
    table: Arc<KeyTable>,
    consumer: Arc<dyn IndexConsumer>,
    allocator: Arc<IndexAllocator>,
    policy: AccessPolicy,
    host: Arc<dyn HostRegistry>,
    bus: Arc<SyncBus>,
}

impl VirtualRegistryStore {
    pub fn new(allocator: Arc<IndexAllocator>, policy: AccessPolicy, host: Arc<dyn HostRegistry>, bus: Arc<SyncBus>) -> Self {
        let table = Arc::new(KeyTable::default());
        let consumer: Arc<dyn IndexConsumer> = table.clone();
        allocator.register(&consumer);
        Self { table, consumer, allocator, policy, host, bus }
    }

    /// Hydrate from persisted nodes without emitting mutations. Persisted
    /// handles are kept; the allocator skips them because this store reports
    /// them live. Returns the number of nodes loaded.
    pub fn load(&self, nodes: Vec<VirtualKeyNode>) -> usize {
        let mut w = self.table.keys.write();
        let mut loaded = 0;
        for mut node in nodes {
            node.path = canonical_key_path(&node.path);
            let path_id = node.path.to_lowercase();
            let mechanism = self.policy.classify(&node.path);
            if mechanism == AccessMechanism::Transparent {
                warn!(target: "appvirt::registry", "ignoring persisted transparent key {}", node.path);
                continue;
            }
            if w.contains_key(&node.handle) || find_by_path(&w, &path_id).is_some() {
                warn!(target: "appvirt::registry", "ignoring duplicate persisted key {:#x} {}", node.handle, node.path);
                continue;
            }
            w.insert(node.handle, KeyEntry { node, path_id, mechanism });
            loaded += 1;
        }
        debug!(target: "appvirt::registry", "loaded {} virtual keys", loaded);
        loaded
    }

    pub fn open_key(&self, path: &str) -> Option<Handle> {
        let path_id = canonical_key_path(path).to_lowercase();
        find_by_path(&self.table.keys.read(), &path_id)
    }

    /// Open the key if present, otherwise create it. Keys classified as
    /// transparent belong to the transparent buffer and yield `InvalidHandle`.
    pub fn create_key(&self, path: &str) -> (StateCode, Option<Handle>) {
        let canonical = canonical_key_path(path);
        let mechanism = self.policy.classify(&canonical);
        if mechanism == AccessMechanism::Transparent {
            return (StateCode::InvalidHandle, None);
        }
        let path_id = canonical.to_lowercase();
        let up = self.table.keys.upgradable_read();
        if let Some(h) = find_by_path(&up, &path_id) {
            return (StateCode::OpenedExisting, Some(h));
        }
        let handle = self.allocator.next(&self.consumer);
        let mut w = RwLockUpgradableReadGuard::upgrade(up);
        let node = VirtualKeyNode::new(handle, canonical);
        trace!(target: "appvirt::registry", "create key {:#x} {} ({:?})", handle, node.path, mechanism);
        w.insert(handle, KeyEntry { node: node.clone(), path_id, mechanism });
        self.bus.enqueue(Mutation::Registry(DatabaseAction::add(node)));
        (StateCode::CreatedNew, Some(handle))
    }

    pub fn query_value(&self, handle: Handle, name: &str) -> (StateCode, Option<VirtualValue>) {
        let (mechanism, path) = {
            let r = self.table.keys.read();
            let Some(entry) = r.get(&handle) else { return (StateCode::InvalidHandle, None) };
            if let Some(v) = entry.node.get_value(name) {
                return (StateCode::Success, Some(v.clone()));
            }
            (entry.mechanism, entry.node.path.clone())
        };
        match mechanism {
            AccessMechanism::Virtual => (StateCode::NotFound, None),
            AccessMechanism::Transparent => unreachable!("transparent key {} reached the virtual registry store", path),
            AccessMechanism::TransparentRead => self.read_host(&path, name),
            AccessMechanism::VirtualWithFallback => self.copy_on_miss(handle, name),
        }
    }

    /// Read the host value once and cache it into the node. Concurrent misses
    /// serialize on the upgradable read so only the first one hits the host.
    fn copy_on_miss(&self, handle: Handle, name: &str) -> (StateCode, Option<VirtualValue>) {
        let up = self.table.keys.upgradable_read();
        let Some(entry) = up.get(&handle) else { return (StateCode::InvalidHandle, None) };
        if let Some(v) = entry.node.get_value(name) {
            return (StateCode::Success, Some(v.clone()));
        }
        let path = entry.node.path.clone();
        match self.host.read_value(&path, name) {
            Ok(Some(v)) => {
                let mut w = RwLockUpgradableReadGuard::upgrade(up);
                if let Some(e) = w.get_mut(&handle) {
                    e.node.put_value(v.clone());
                    trace!(target: "appvirt::registry", "cached host value {}\\{}", path, v.name);
                    self.bus.enqueue(Mutation::Registry(DatabaseAction::update(e.node.clone())));
                }
                (StateCode::Success, Some(v))
            }
            Ok(None) => (StateCode::NotFound, None),
            Err(e) => (e.read_state(), None),
        }
    }

    fn read_host(&self, path: &str, name: &str) -> (StateCode, Option<VirtualValue>) {
        match self.host.read_value(path, name) {
            Ok(Some(v)) => (StateCode::Success, Some(v)),
            Ok(None) => (StateCode::NotFound, None),
            Err(e) => (e.read_state(), None),
        }
    }

    pub fn set_value(&self, handle: Handle, value: VirtualValue) -> StateCode {
        let mut w = self.table.keys.write();
        let Some(e) = w.get_mut(&handle) else { return StateCode::InvalidHandle };
        e.node.put_value(value);
        self.bus.enqueue(Mutation::Registry(DatabaseAction::update(e.node.clone())));
        StateCode::Success
    }

    pub fn delete_value(&self, handle: Handle, name: &str) -> StateCode {
        let mut w = self.table.keys.write();
        let Some(e) = w.get_mut(&handle) else { return StateCode::InvalidHandle };
        if e.node.remove_value(name).is_none() {
            return StateCode::NotFound;
        }
        self.bus.enqueue(Mutation::Registry(DatabaseAction::update(e.node.clone())));
        StateCode::Success
    }

    /// Remove the key and every virtual key below it, releasing each handle once.
    pub fn delete_key(&self, handle: Handle) -> StateCode {
        let released: Vec<Handle> = {
            let mut w = self.table.keys.write();
            let Some(root) = w.get(&handle) else { return StateCode::InvalidHandle };
            let root_path = root.node.path.clone();
            let doomed: Vec<Handle> = w
                .iter()
                .filter(|(_, e)| is_same_or_descendant(&e.node.path, &root_path))
                .map(|(h, _)| *h)
                .collect();
            for h in &doomed {
                if let Some(e) = w.remove(h) {
                    self.bus.enqueue(Mutation::Registry(DatabaseAction::remove(e.node)));
                }
            }
            debug!(target: "appvirt::registry", "deleted key {} ({} nodes)", root_path, doomed.len());
            doomed
        };
        for h in released { self.allocator.release(h); }
        StateCode::Success
    }

    pub fn contains(&self, handle: Handle) -> bool { self.table.keys.read().contains_key(&handle) }

    pub fn path_of(&self, handle: Handle) -> Option<String> {
        self.table.keys.read().get(&handle).map(|e| e.node.path.clone())
    }

    pub fn mechanism_of(&self, handle: Handle) -> Option<AccessMechanism> {
        self.table.keys.read().get(&handle).map(|e| e.mechanism)
    }

    /// Values cached or written into the key, sorted by name.
    pub fn enum_values(&self, handle: Handle) -> Option<Vec<VirtualValue>> {
        let r = self.table.keys.read();
        let e = r.get(&handle)?;
        let mut vals: Vec<VirtualValue> = e.node.values.values().cloned().collect();
        vals.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Some(vals)
    }

    pub fn snapshot(&self, handle: Handle) -> Option<VirtualKeyNode> {
        self.table.keys.read().get(&handle).map(|e| e.node.clone())
    }

    pub fn len(&self) -> usize { self.table.keys.read().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
#[path = "virtual_store_tests.rs"]
mod virtual_store_tests;
