//! Change synchronization bus
//! --------------------------
//! Two FIFO queues, one per resource kind, each behind its own lock. Stores
//! enqueue mutation records and return immediately; `flush` swaps each queue
//! out under its lock and forwards the batch to the persistent store with the
//! queue lock released. A per-queue flush gate is held from the swap until the
//! store has accepted or refused the batch, so overlapping flushes reach the
//! store in enqueue order. An optional background thread flushes on an interval.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::filesystem::types::FileTableEntry;
use crate::persist::{DatabaseAction, PersistentStore};
use crate::registry::types::VirtualKeyNode;

/// A mutation produced by one of the stores.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    FileSystem(DatabaseAction<FileTableEntry>),
    Registry(DatabaseAction<VirtualKeyNode>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Actions handed to the file table store.
    pub filesystem: usize,
    /// Actions handed to the registry store.
    pub registry: usize,
    /// Queues skipped because their queue lock or flush gate was not acquired in time.
    pub skipped: usize,
    /// Batches put back because the store refused them.
    pub failed: usize,
}

pub struct SyncBus {
    fs_queue: Mutex<Vec<DatabaseAction<FileTableEntry>>>,
    reg_queue: Mutex<Vec<DatabaseAction<VirtualKeyNode>>>,
    /// Held for the whole drain -> store -> requeue sequence of one queue.
    fs_gate: Mutex<()>,
    reg_gate: Mutex<()>,
    fs_store: Arc<dyn PersistentStore<FileTableEntry>>,
    reg_store: Arc<dyn PersistentStore<VirtualKeyNode>>,
    flush_interval: Duration,
    lock_timeout: Duration,
    auto_flush: AtomicBool,
    worker_running: AtomicBool,
}

impl SyncBus {
    pub fn new(
        fs_store: Arc<dyn PersistentStore<FileTableEntry>>,
        reg_store: Arc<dyn PersistentStore<VirtualKeyNode>>,
        flush_interval: Duration,
        lock_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            fs_queue: Mutex::new(Vec::new()),
            reg_queue: Mutex::new(Vec::new()),
            fs_gate: Mutex::new(()),
            reg_gate: Mutex::new(()),
            fs_store,
            reg_store,
            flush_interval,
            lock_timeout,
            auto_flush: AtomicBool::new(false),
            worker_running: AtomicBool::new(false),
        })
    }

    /// Append a mutation to its queue. Never performs I/O.
    pub fn enqueue(&self, m: Mutation) {
        match m {
            Mutation::FileSystem(a) => {
                trace!(target: "appvirt::sync", "queue fs {:?} {}", a.action_type, a.item.key);
                self.fs_queue.lock().push(a);
            }
            Mutation::Registry(a) => {
                trace!(target: "appvirt::sync", "queue registry {:?} {:#x}", a.action_type, a.item.handle);
                self.reg_queue.lock().push(a);
            }
        }
    }

    pub fn pending(&self) -> (usize, usize) { (self.fs_queue.lock().len(), self.reg_queue.lock().len()) }

    /// Drain both queues into their persistent stores, one call per non-empty batch.
    pub fn flush(&self) -> FlushReport {
        let mut report = FlushReport::default();
        match flush_queue(&self.fs_gate, &self.fs_queue, &*self.fs_store, self.lock_timeout) {
            Flushed::Skipped => report.skipped += 1,
            Flushed::Sent(n) => report.filesystem = n,
            Flushed::Requeued(n, e) => {
                warn!(target: "appvirt::sync", "file table flush failed, {} actions re-queued: {:#}", n, e);
                report.failed += 1;
            }
        }
        match flush_queue(&self.reg_gate, &self.reg_queue, &*self.reg_store, self.lock_timeout) {
            Flushed::Skipped => report.skipped += 1,
            Flushed::Sent(n) => report.registry = n,
            Flushed::Requeued(n, e) => {
                warn!(target: "appvirt::sync", "registry flush failed, {} actions re-queued: {:#}", n, e);
                report.failed += 1;
            }
        }
        if report.skipped > 0 {
            warn!(target: "appvirt::sync", "flush skipped {} queue(s): lock not acquired within {:?}", report.skipped, self.lock_timeout);
        }
        if report.filesystem + report.registry > 0 {
            debug!(target: "appvirt::sync", "flushed fs={} registry={}", report.filesystem, report.registry);
        }
        report
    }

    pub fn auto_flush(&self) -> bool { self.auto_flush.load(Ordering::SeqCst) }

    /// Toggle interval flushing. Enabling spawns at most one worker thread.
    pub fn set_auto_flush(self: &Arc<Self>, enabled: bool) {
        self.auto_flush.store(enabled, Ordering::SeqCst);
        if enabled { self.ensure_worker(); }
    }

    fn ensure_worker(self: &Arc<Self>) {
        if self.worker_running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return;
        }
        let weak: Weak<SyncBus> = Arc::downgrade(self);
        let interval = self.flush_interval;
        let spawned = std::thread::Builder::new()
            .name("appvirt-flush".into())
            .spawn(move || flush_loop(weak, interval));
        if let Err(e) = spawned {
            warn!(target: "appvirt::sync", "could not start flush worker: {}", e);
            self.worker_running.store(false, Ordering::SeqCst);
        }
    }

    pub fn worker_running(&self) -> bool { self.worker_running.load(Ordering::SeqCst) }
}

fn flush_loop(bus: Weak<SyncBus>, interval: Duration) {
    debug!(target: "appvirt::sync", "flush worker started, interval {:?}", interval);
    loop {
        std::thread::sleep(interval);
        let Some(strong) = bus.upgrade() else { return };
        if strong.auto_flush() {
            strong.flush();
            continue;
        }
        strong.worker_running.store(false, Ordering::SeqCst);
        // Auto flush may have been re-enabled while we were winding down; if so,
        // take the worker slot back instead of leaving the bus without a worker.
        if strong.auto_flush() && strong.worker_running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            continue;
        }
        debug!(target: "appvirt::sync", "flush worker stopped");
        return;
    }
}

enum Flushed {
    Skipped,
    Sent(usize),
    Requeued(usize, anyhow::Error),
}

fn flush_queue<T: Clone>(
    gate: &Mutex<()>,
    queue: &Mutex<Vec<DatabaseAction<T>>>,
    store: &dyn PersistentStore<T>,
    timeout: Duration,
) -> Flushed {
    let Some(_gate) = gate.try_lock_for(timeout) else { return Flushed::Skipped };
    let Some(batch) = drain(queue, timeout) else { return Flushed::Skipped };
    if batch.is_empty() {
        return Flushed::Sent(0);
    }
    let n = batch.len();
    match store.enqueue(batch.clone()) {
        Ok(()) => Flushed::Sent(n),
        Err(e) => {
            requeue(queue, batch);
            Flushed::Requeued(n, e)
        }
    }
}

fn drain<T>(queue: &Mutex<Vec<T>>, timeout: Duration) -> Option<Vec<T>> {
    let mut g = queue.try_lock_for(timeout)?;
    Some(std::mem::take(&mut *g))
}

/// Put a refused batch back ahead of anything queued since.
fn requeue<T>(queue: &Mutex<Vec<T>>, batch: Vec<T>) {
    let mut g = queue.lock();
    let newer = std::mem::replace(&mut *g, batch);
    g.extend(newer);
}

#[cfg(test)]
#[path = "sync/sync_tests.rs"]
mod sync_tests;
