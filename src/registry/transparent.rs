//! Handles for registry keys that are passed straight through to the host.
//!
//! Only the handle -> path association is kept; every value access goes to the
//! host live, nothing is cached and nothing is persisted.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

use crate::error::StateCode;
use crate::index::{Handle, IndexAllocator, IndexConsumer};
use crate::registry::host::HostRegistry;
use crate::registry::path::canonical_key_path;
use crate::registry::types::VirtualValue;

#[derive(Default)]
struct BufferTable {
    keys: RwLock<HashMap<Handle, String>>,
}

impl IndexConsumer for BufferTable {
    fn is_index_in_use(&self, index: Handle) -> bool { self.keys.read_recursive().contains_key(&index) }
}

pub struct TransparentResourceBuffer {
    table: Arc<BufferTable>,
    consumer: Arc<dyn IndexConsumer>,
    allocator: Arc<IndexAllocator>,
    host: Arc<dyn HostRegistry>,
}

impl TransparentResourceBuffer {
    pub fn new(allocator: Arc<IndexAllocator>, host: Arc<dyn HostRegistry>) -> Self {
        let table = Arc::new(BufferTable::default());
        let consumer: Arc<dyn IndexConsumer> = table.clone();
        allocator.register(&consumer);
        Self { table, consumer, allocator, host }
    }

    fn track(&self, path: String) -> Handle {
        let handle = self.allocator.next(&self.consumer);
        trace!(target: "appvirt::transparent", "open {:#x} {}", handle, path);
        self.table.keys.write().insert(handle, path);
        handle
    }

    /// Open an existing host key. Every successful open yields a fresh handle.
    pub fn open_key(&self, path: &str) -> (StateCode, Option<Handle>) {
        let canonical = canonical_key_path(path);
        match self.host.key_exists(&canonical) {
            Ok(true) => (StateCode::Success, Some(self.track(canonical))),
            Ok(false) => (StateCode::NotFound, None),
            Err(e) => (e.read_state(), None),
        }
    }

    pub fn create_key(&self, path: &str) -> (StateCode, Option<Handle>) {
        let canonical = canonical_key_path(path);
        match self.host.create_key(&canonical) {
            Ok(created) => {
                let st = if created { StateCode::CreatedNew } else { StateCode::OpenedExisting };
                (st, Some(self.track(canonical)))
            }
            Err(e) => (e.write_state(), None),
        }
    }

    /// Delete the key on the host. The handle is closed only if the delete succeeded.
    pub fn delete_key(&self, handle: Handle) -> StateCode {
        let Some(path) = self.path_of(handle) else { return StateCode::InvalidHandle };
        match self.host.delete_key(&path) {
            Ok(true) => {
                self.close_key(handle);
                StateCode::Success
            }
            Ok(false) => StateCode::NotFound,
            Err(e) => e.write_state(),
        }
    }

    pub fn close_key(&self, handle: Handle) -> StateCode {
        if self.table.keys.write().remove(&handle).is_none() {
            return StateCode::InvalidHandle;
        }
        self.allocator.release(handle);
        trace!(target: "appvirt::transparent", "closed {:#x}", handle);
        StateCode::Success
    }

    pub fn query_value(&self, handle: Handle, name: &str) -> (StateCode, Option<VirtualValue>) {
        let Some(path) = self.path_of(handle) else { return (StateCode::InvalidHandle, None) };
        match self.host.read_value(&path, name) {
            Ok(Some(v)) => (StateCode::Success, Some(v)),
            Ok(None) => (StateCode::NotFound, None),
            Err(e) => (e.read_state(), None),
        }
    }

    pub fn set_value(&self, handle: Handle, value: &VirtualValue) -> StateCode {
        let Some(path) = self.path_of(handle) else { return StateCode::InvalidHandle };
        match self.host.write_value(&path, value) {
            Ok(()) => StateCode::Success,
            Err(e) => e.write_state(),
        }
    }

    pub fn delete_value(&self, handle: Handle, name: &str) -> StateCode {
        let Some(path) = self.path_of(handle) else { return StateCode::InvalidHandle };
        match self.host.delete_value(&path, name) {
            Ok(true) => StateCode::Success,
            Ok(false) => StateCode::NotFound,
            Err(e) => e.write_state(),
        }
    }

    pub fn path_of(&self, handle: Handle) -> Option<String> { self.table.keys.read().get(&handle).cloned() }

    pub fn contains(&self, handle: Handle) -> bool { self.table.keys.read().contains_key(&handle) }

    pub fn len(&self) -> usize { self.table.keys.read().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::host::MemoryHostRegistry;

    fn buffer() -> (TransparentResourceBuffer, Arc<MemoryHostRegistry>, Arc<IndexAllocator>) {
        let alloc = Arc::new(IndexAllocator::new());
        let host = Arc::new(MemoryHostRegistry::new());
        (TransparentResourceBuffer::new(alloc.clone(), host.clone()), host, alloc)
    }

    #[test]
    fn open_requires_host_key_and_hands_out_fresh_handles() {
        let (buf, host, _) = buffer();
        assert_eq!(buf.open_key("HKEY_PERFORMANCE_DATA\\Missing"), (StateCode::NotFound, None));
        host.create_key("HKEY_PERFORMANCE_DATA\\Counters").unwrap();
        let a = buf.open_key("HKEY_PERFORMANCE_DATA\\Counters").1.unwrap();
        let b = buf.open_key("hkey_performance_data\\counters").1.unwrap();
        assert_ne!(a, b);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.close_key(a), StateCode::Success);
        assert_eq!(buf.close_key(a), StateCode::InvalidHandle);
    }

    #[test]
    fn values_are_read_live_every_time() {
        let (buf, host, _) = buffer();
        host.seed("HKEY_DYN_DATA\\Cfg", VirtualValue::dword("v", 1));
        let h = buf.open_key("HKEY_DYN_DATA\\Cfg").1.unwrap();
        assert_eq!(buf.query_value(h, "v").1.and_then(|v| v.as_dword()), Some(1));
        host.seed("HKEY_DYN_DATA\\Cfg", VirtualValue::dword("v", 2));
        assert_eq!(buf.query_value(h, "v").1.and_then(|v| v.as_dword()), Some(2));
        assert_eq!(buf.set_value(h, &VirtualValue::dword("w", 3)), StateCode::Success);
        assert_eq!(host.read_value("HKEY_DYN_DATA\\Cfg", "w").unwrap().and_then(|v| v.as_dword()), Some(3));
        assert_eq!(buf.delete_value(h, "w"), StateCode::Success);
        assert_eq!(buf.delete_value(h, "w"), StateCode::NotFound);
    }

    #[test]
    fn create_and_delete_report_host_outcome() {
        let (buf, host, _) = buffer();
        let (st, h) = buf.create_key("HKEY_DYN_DATA\\New");
        assert_eq!(st, StateCode::CreatedNew);
        assert_eq!(buf.create_key("HKEY_DYN_DATA\\New").0, StateCode::OpenedExisting);
        host.deny("HKEY_DYN_DATA\\Locked");
        assert_eq!(buf.create_key("HKEY_DYN_DATA\\Locked"), (StateCode::AccessDenied, None));

        let h = h.unwrap();
        assert_eq!(buf.delete_key(h), StateCode::Success);
        assert!(!buf.contains(h));
        assert!(!host.key_exists("HKEY_DYN_DATA\\New").unwrap());
    }

    #[test]
    fn shares_the_handle_space_with_other_consumers() {
        let (buf, host, alloc) = buffer();
        host.create_key("HKEY_DYN_DATA\\K").unwrap();
        let h = buf.open_key("HKEY_DYN_DATA\\K").1.unwrap();
        // a closed handle goes back to the shared pool
        buf.close_key(h);
        struct Nobody;
        impl IndexConsumer for Nobody {
            fn is_index_in_use(&self, _: Handle) -> bool { false }
        }
        let other: Arc<dyn IndexConsumer> = Arc::new(Nobody);
        assert_eq!(alloc.next(&other), h);
    }
}
