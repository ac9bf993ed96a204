//! Host registry accessors. The engine never talks to the real registry directly;
//! it goes through `HostRegistry` so the platform binding stays outside the core.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{HostError, HostResult};
use crate::registry::path::{canonical_key_path, hive_of, is_same_or_descendant, key_id};
use crate::registry::types::VirtualValue;

pub trait HostRegistry: Send + Sync {
    fn key_exists(&self, path: &str) -> HostResult<bool>;
    /// `Ok(None)` when the key exists but has no such value.
    fn read_value(&self, path: &str, name: &str) -> HostResult<Option<VirtualValue>>;
    fn write_value(&self, path: &str, value: &VirtualValue) -> HostResult<()>;
    fn delete_value(&self, path: &str, name: &str) -> HostResult<bool>;
    /// Returns true when the key was newly created.
    fn create_key(&self, path: &str) -> HostResult<bool>;
    fn delete_key(&self, path: &str) -> HostResult<bool>;
}

#[derive(Debug, Clone)]
struct HostKey {
    values: HashMap<String, VirtualValue>,
}

/// In-process registry. Stands in for the platform registry where none is
/// available and lets callers simulate permission failures.
#[derive(Default)]
pub struct MemoryHostRegistry {
    keys: RwLock<HashMap<String, HostKey>>,
    denied: RwLock<Vec<String>>,
    reads: AtomicU64,
}

impl MemoryHostRegistry {
    pub fn new() -> Self { Self::default() }

    /// Every operation on `prefix` or below fails with `AccessDenied`.
    pub fn deny(&self, prefix: &str) { self.denied.write().push(canonical_key_path(prefix)); }

    pub fn allow_all(&self) { self.denied.write().clear(); }

    /// Number of `read_value` calls served so far.
    pub fn read_count(&self) -> u64 { self.reads.load(Ordering::SeqCst) }

    /// Seed a value, creating the key and its ancestors.
    pub fn seed(&self, path: &str, value: VirtualValue) {
        self.ensure_key(path);
        if let Some(k) = self.keys.write().get_mut(&key_id(path)) {
            k.values.insert(value.name.to_lowercase(), value);
        }
    }

    fn check(&self, path: &str) -> HostResult<()> {
        let canonical = canonical_key_path(path);
        if self.denied.read().iter().any(|p| is_same_or_descendant(&canonical, p)) {
            return Err(HostError::AccessDenied(canonical));
        }
        Ok(())
    }

    fn is_hive_root(path: &str) -> bool {
        let c = canonical_key_path(path);
        hive_of(&c).is_some() && !c.contains('\\')
    }

    fn ensure_key(&self, path: &str) -> bool {
        let canonical = canonical_key_path(path);
        let mut w = self.keys.write();
        let mut created = false;
        let mut prefix = String::new();
        for seg in canonical.split('\\') {
            if !prefix.is_empty() { prefix.push('\\'); }
            prefix.push_str(seg);
            let id = prefix.to_lowercase();
            if !w.contains_key(&id) {
                w.insert(id, HostKey { values: HashMap::new() });
                created = true;
            }
        }
        created
    }
}

impl HostRegistry for MemoryHostRegistry {
    fn key_exists(&self, path: &str) -> HostResult<bool> {
        self.check(path)?;
        Ok(Self::is_hive_root(path) || self.keys.read().contains_key(&key_id(path)))
    }

    fn read_value(&self, path: &str, name: &str) -> HostResult<Option<VirtualValue>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check(path)?;
        match self.keys.read().get(&key_id(path)) {
            Some(k) => Ok(k.values.get(&name.to_lowercase()).cloned()),
            None => Err(HostError::NotFound(canonical_key_path(path))),
        }
    }

    fn write_value(&self, path: &str, value: &VirtualValue) -> HostResult<()> {
        self.check(path)?;
        match self.keys.write().get_mut(&key_id(path)) {
            Some(k) => {
                k.values.insert(value.name.to_lowercase(), value.clone());
                Ok(())
            }
            None => Err(HostError::NotFound(canonical_key_path(path))),
        }
    }

    fn delete_value(&self, path: &str, name: &str) -> HostResult<bool> {
        self.check(path)?;
        match self.keys.write().get_mut(&key_id(path)) {
            Some(k) => Ok(k.values.remove(&name.to_lowercase()).is_some()),
            None => Err(HostError::NotFound(canonical_key_path(path))),
        }
    }

    fn create_key(&self, path: &str) -> HostResult<bool> {
        self.check(path)?;
        Ok(self.ensure_key(path))
    }

    fn delete_key(&self, path: &str) -> HostResult<bool> {
        self.check(path)?;
        if Self::is_hive_root(path) {
            return Err(HostError::AccessDenied(canonical_key_path(path)));
        }
        let id = key_id(path);
        let mut w = self.keys.write();
        let before = w.len();
        w.retain(|k, _| !is_same_or_descendant(k, &id));
        Ok(w.len() != before)
    }
}
