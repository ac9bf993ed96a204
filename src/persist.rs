//! Persistent backing stores for the virtual namespaces.
//! ----------------------------------------------------
//! The engine hands batches of `DatabaseAction`s to a `PersistentStore` and reads
//! the surviving entries back once at startup. Two instances exist per engine,
//! one for the file table and one for registry keys. The file-backed stores
//! append each batch as one checksummed record (`log`), and serialize only the
//! row types in `rows`; the in-memory model carries no serialization logic.

pub mod database;
pub mod log;
pub mod memory;
pub mod rows;

use anyhow::Result;
use std::collections::BTreeMap;

use crate::filesystem::types::FileTableEntry;
use crate::registry::types::VirtualKeyNode;

pub use database::{FileTableDatabase, RegistryDatabase};
pub use memory::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType { Add, Update, Remove }

/// A queued mutation of one item.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseAction<T> {
    pub item: T,
    pub action_type: ActionType,
}

impl<T> DatabaseAction<T> {
    pub fn new(item: T, action_type: ActionType) -> Self { Self { item, action_type } }
    pub fn add(item: T) -> Self { Self::new(item, ActionType::Add) }
    pub fn update(item: T) -> Self { Self::new(item, ActionType::Update) }
    pub fn remove(item: T) -> Self { Self::new(item, ActionType::Remove) }
}

pub trait PersistentStore<T>: Send + Sync {
    /// Accept a batch for durable storage. Batches are applied in call order.
    fn enqueue(&self, batch: Vec<DatabaseAction<T>>) -> Result<()>;
    /// Every surviving item, used once at startup.
    fn read_all(&self) -> Result<Vec<T>>;
}

/// Identity under which replay folds actions together.
pub trait Keyed {
    type Id: Ord + Clone;
    fn identity(&self) -> Self::Id;
}

impl Keyed for FileTableEntry {
    type Id = String;
    fn identity(&self) -> String { self.key.to_lowercase() }
}

impl Keyed for VirtualKeyNode {
    type Id = u32;
    fn identity(&self) -> u32 { self.handle }
}

/// Fold actions in order: add/update upsert, remove deletes.
pub fn replay<T: Keyed + Clone>(state: &mut BTreeMap<T::Id, T>, actions: &[DatabaseAction<T>]) {
    for a in actions {
        match a.action_type {
            ActionType::Add | ActionType::Update => { state.insert(a.item.identity(), a.item.clone()); }
            ActionType::Remove => { state.remove(&a.item.identity()); }
        }
    }
}
