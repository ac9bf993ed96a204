//! Handle allocation shared by the virtual registry store and the transparent buffer.
//! ---------------------------------------------------------------------------------
//! Handles are reusable 32-bit indices. Released handles go to a free pool and
//! the smallest one is handed out first; otherwise a monotonic counter advances
//! past excluded ranges and past indices any registered consumer still holds.
//!
//! Two locks: the counter/free pool sits behind a mutex that is never held while
//! consumer code runs, and the consumer list sits behind a reader/writer lock so
//! liveness checks from several allocating threads proceed concurrently.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::trace;

pub type Handle = u32;

/// Inclusive range of indices the allocator must never emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRange {
    pub start: u32,
    pub end: u32,
}

impl IndexRange {
    pub fn new(start: u32, end: u32) -> Self {
        assert!(start <= end, "index range start {start} > end {end}");
        Self { start, end }
    }

    #[inline]
    pub fn contains(&self, index: u32) -> bool { index >= self.start && index <= self.end }
}

/// A holder of indices. Implementors answer whether an index is still live.
///
/// Called without any allocator lock held. Implementations that guard their
/// state with a `parking_lot::RwLock` should take `read_recursive` so a check
/// issued while the same thread holds an upgradable read does not block.
pub trait IndexConsumer: Send + Sync {
    fn is_index_in_use(&self, index: Handle) -> bool;
}

#[derive(Debug, Default)]
struct IndexState {
    /// Last index handed out by the counter.
    last: u32,
    free: BTreeSet<u32>,
}

pub struct IndexAllocator {
    state: Mutex<IndexState>,
    consumers: RwLock<Vec<Arc<dyn IndexConsumer>>>,
    excluded: RwLock<Vec<IndexRange>>,
}

impl Default for IndexAllocator {
    fn default() -> Self { Self::new() }
}

impl IndexAllocator {
    /// Index 0 is never emitted; it reads as the null handle.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(IndexState::default()),
            consumers: RwLock::new(Vec::new()),
            excluded: RwLock::new(Vec::new()),
        }
    }

    pub fn with_excluded(ranges: impl IntoIterator<Item = IndexRange>) -> Self {
        let alloc = Self::new();
        alloc.excluded.write().extend(ranges);
        alloc
    }

    pub fn exclude(&self, range: IndexRange) { self.excluded.write().push(range); }

    pub fn excluded_ranges(&self) -> Vec<IndexRange> { self.excluded.read().clone() }

    /// Register a consumer. Idempotent on pointer identity.
    pub fn register(&self, consumer: &Arc<dyn IndexConsumer>) {
        if self.is_registered(consumer) { return; }
        let mut w = self.consumers.write();
        if !w.iter().any(|c| Arc::ptr_eq(c, consumer)) {
            w.push(consumer.clone());
        }
    }

    fn is_registered(&self, consumer: &Arc<dyn IndexConsumer>) -> bool {
        self.consumers.read().iter().any(|c| Arc::ptr_eq(c, consumer))
    }

    /// Unregister a consumer. Its live indices stop being excluded from allocation.
    pub fn detach(&self, consumer: &Arc<dyn IndexConsumer>) -> bool {
        let mut w = self.consumers.write();
        let before = w.len();
        w.retain(|c| !Arc::ptr_eq(c, consumer));
        w.len() != before
    }

    pub fn consumer_count(&self) -> usize { self.consumers.read().len() }

    /// Allocate a handle on behalf of `consumer`, registering it if needed.
    ///
    /// Panics when the 32-bit index space is exhausted.
    pub fn next(&self, consumer: &Arc<dyn IndexConsumer>) -> Handle {
        self.register(consumer);
        loop {
            let candidate = self.take_candidate();
            if !self.in_use_by_consumers(candidate) {
                trace!(target: "appvirt::index", "allocated handle {:#x}", candidate);
                return candidate;
            }
            // Held by someone (e.g. a handle hydrated from the database); not ours to reuse.
            trace!(target: "appvirt::index", "skipping live handle {:#x}", candidate);
        }
    }

    /// Return a handle to the free pool. Not verified: callers must not double-release.
    pub fn release(&self, handle: Handle) {
        trace!(target: "appvirt::index", "released handle {:#x}", handle);
        self.state.lock().free.insert(handle);
    }

    fn take_candidate(&self) -> u32 {
        let excluded = self.excluded.read().clone();
        let is_excluded = |i: u32| excluded.iter().any(|r| r.contains(i));
        let mut st = self.state.lock();
        while let Some(free) = st.free.pop_first() {
            if !is_excluded(free) { return free; }
        }
        loop {
            st.last = st
                .last
                .checked_add(1)
                .unwrap_or_else(|| panic!("handle space exhausted: 32-bit index counter wrapped"));
            if !is_excluded(st.last) { return st.last; }
        }
    }

    fn in_use_by_consumers(&self, index: u32) -> bool {
        self.consumers.read().iter().any(|c| c.is_index_in_use(index))
    }
}
