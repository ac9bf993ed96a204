use super::*;
use crate::filesystem::types::FileKind;
use crate::persist::{ActionType, MemoryStore};

fn bus_with_stores(interval_ms: u64) -> (Arc<SyncBus>, Arc<MemoryStore<FileTableEntry>>, Arc<MemoryStore<VirtualKeyNode>>) {
    let fs = Arc::new(MemoryStore::<FileTableEntry>::new());
    let reg = Arc::new(MemoryStore::<VirtualKeyNode>::new());
    let bus = SyncBus::new(fs.clone(), reg.clone(), Duration::from_millis(interval_ms), Duration::from_millis(50));
    (bus, fs, reg)
}

fn fs_add(i: usize) -> Mutation {
    Mutation::FileSystem(DatabaseAction::add(FileTableEntry::new(format!("/f{i}"), format!("Other/f{i}"), FileKind::File)))
}

#[test]
fn flush_sends_one_batch_in_enqueue_order() {
    let (bus, fs, reg) = bus_with_stores(500);
    for i in 0..10 { bus.enqueue(fs_add(i)); }
    let report = bus.flush();
    assert_eq!(report.filesystem, 10);
    assert_eq!(report.registry, 0);
    assert_eq!(fs.batch_count(), 1);
    let keys: Vec<String> = fs.batches()[0].iter().map(|a| a.item.key.clone()).collect();
    let expected: Vec<String> = (0..10).map(|i| format!("/f{i}")).collect();
    assert_eq!(keys, expected);
    // empty registry queue is never sent
    assert_eq!(reg.batch_count(), 0);
    assert_eq!(bus.pending(), (0, 0));
}

#[test]
fn empty_flush_sends_nothing() {
    let (bus, fs, reg) = bus_with_stores(500);
    assert_eq!(bus.flush(), FlushReport::default());
    assert_eq!(fs.batch_count() + reg.batch_count(), 0);
}

#[test]
fn queues_are_independent() {
    let (bus, fs, reg) = bus_with_stores(500);
    bus.enqueue(fs_add(1));
    bus.enqueue(Mutation::Registry(DatabaseAction::remove(VirtualKeyNode::new(4, "HKEY_USERS\\X"))));
    bus.enqueue(fs_add(2));
    let report = bus.flush();
    assert_eq!((report.filesystem, report.registry), (2, 1));
    assert_eq!(reg.batches()[0][0].action_type, ActionType::Remove);
    assert_eq!(fs.batches()[0].len(), 2);
}

#[test]
fn failed_batch_is_requeued_ahead_of_newer_actions() {
    let (bus, fs, _reg) = bus_with_stores(500);
    bus.enqueue(fs_add(1));
    bus.enqueue(fs_add(2));
    fs.fail_next(1);
    let report = bus.flush();
    assert_eq!(report.failed, 1);
    assert_eq!(report.filesystem, 0);
    bus.enqueue(fs_add(3));
    assert_eq!(bus.pending().0, 3);
    bus.flush();
    let keys: Vec<String> = fs.batches()[0].iter().map(|a| a.item.key.clone()).collect();
    assert_eq!(keys, vec!["/f1", "/f2", "/f3"]);
}

#[test]
fn flush_skips_a_queue_whose_lock_is_held() {
    let (bus, fs, _reg) = bus_with_stores(500);
    bus.enqueue(fs_add(1));
    let guard = bus.fs_queue.lock();
    let report = bus.flush();
    drop(guard);
    assert_eq!(report.skipped, 1);
    assert_eq!(fs.batch_count(), 0);
    assert_eq!(bus.flush().filesystem, 1);
}

#[test]
fn auto_flush_runs_in_background_with_a_single_worker() {
    let (bus, fs, _reg) = bus_with_stores(20);
    bus.set_auto_flush(true);
    bus.set_auto_flush(true);
    assert!(bus.worker_running());
    bus.enqueue(fs_add(1));
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while fs.batch_count() == 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(fs.batch_count(), 1);

    bus.set_auto_flush(false);
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while bus.worker_running() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!bus.worker_running());
    bus.enqueue(fs_add(2));
    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(fs.batch_count(), 1, "no flush expected once auto flush is off");
}

/// File table store that stalls on its first batch.
struct StallingStore {
    inner: MemoryStore<FileTableEntry>,
    stall: Duration,
    calls: std::sync::atomic::AtomicUsize,
}

impl PersistentStore<FileTableEntry> for StallingStore {
    fn enqueue(&self, batch: Vec<DatabaseAction<FileTableEntry>>) -> anyhow::Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            std::thread::sleep(self.stall);
        }
        self.inner.enqueue(batch)
    }
    fn read_all(&self) -> anyhow::Result<Vec<FileTableEntry>> { self.inner.read_all() }
}

fn stalling_bus(stall_ms: u64, lock_timeout_ms: u64) -> (Arc<SyncBus>, Arc<StallingStore>) {
    let fs = Arc::new(StallingStore {
        inner: MemoryStore::new(),
        stall: Duration::from_millis(stall_ms),
        calls: std::sync::atomic::AtomicUsize::new(0),
    });
    let reg = Arc::new(MemoryStore::<VirtualKeyNode>::new());
    let bus = SyncBus::new(fs.clone(), reg, Duration::from_millis(500), Duration::from_millis(lock_timeout_ms));
    (bus, fs)
}

fn wait_for_calls(store: &StallingStore, n: usize) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while store.calls.load(Ordering::SeqCst) < n && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn overlapping_flushes_reach_the_store_in_enqueue_order() {
    let (bus, fs) = stalling_bus(300, 2_000);
    let first = FileTableEntry::new("/first", "Other/first", FileKind::File);
    bus.enqueue(Mutation::FileSystem(DatabaseAction::add(first.clone())));
    let slow = {
        let bus = bus.clone();
        std::thread::spawn(move || bus.flush())
    };
    wait_for_calls(&fs, 1);
    bus.enqueue(Mutation::FileSystem(DatabaseAction::remove(first)));
    let report = bus.flush();
    assert_eq!(report.filesystem, 1);
    assert_eq!(slow.join().unwrap().filesystem, 1);

    let kinds: Vec<ActionType> = fs.inner.batches().iter().map(|b| b[0].action_type).collect();
    assert_eq!(kinds, vec![ActionType::Add, ActionType::Remove]);
    assert!(fs.inner.read_all().unwrap().is_empty());
}

#[test]
fn flush_is_skipped_while_another_flush_holds_the_queue() {
    let (bus, fs) = stalling_bus(300, 20);
    bus.enqueue(fs_add(1));
    let slow = {
        let bus = bus.clone();
        std::thread::spawn(move || bus.flush())
    };
    wait_for_calls(&fs, 1);
    bus.enqueue(fs_add(2));
    let report = bus.flush();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.filesystem, 0);
    slow.join().unwrap();
    // the skipped action is still queued and goes out next time
    assert_eq!(bus.pending().0, 1);
    assert_eq!(bus.flush().filesystem, 1);
    let keys: Vec<String> = fs.inner.batches().iter().flat_map(|b| b.iter().map(|a| a.item.key.clone())).collect();
    assert_eq!(keys, vec!["/f1", "/f2"]);
}
