use super::*;
use crate::persist::MemoryStore;
use crate::registry::types::ValueType;
use std::path::Path;

struct Fixture {
    engine: Engine,
    host: Arc<MemoryHostRegistry>,
    reg: Arc<MemoryStore<VirtualKeyNode>>,
    fs: Arc<MemoryStore<FileTableEntry>>,
}

fn config(tmp: &Path) -> EngineConfig {
    EngineConfig {
        virtual_root: tmp.join("vroot"),
        database_dir: tmp.join("db"),
        temp_dir: Some(tmp.join("scratch")),
        auto_flush: false,
        virtual_key_prefixes: vec!["HKCU\\Software\\Sealed".into()],
        ..EngineConfig::default()
    }
}

fn fixture_with(tmp: &Path, fs: MemoryStore<FileTableEntry>, reg: MemoryStore<VirtualKeyNode>) -> Fixture {
    let host = Arc::new(MemoryHostRegistry::new());
    let fs = Arc::new(fs);
    let reg = Arc::new(reg);
    let engine = Engine::new(
        config(tmp),
        EngineHosts { registry: host.clone(), files: Arc::new(StdFileSystem) },
        EngineStores { files: fs.clone(), registry: reg.clone() },
    );
    Fixture { engine, host, reg, fs }
}

fn fixture(tmp: &Path) -> Fixture { fixture_with(tmp, MemoryStore::new(), MemoryStore::new()) }

const HKCU: Handle = 0x8000_0001;
const HKLM: Handle = 0x8000_0002;
const HKU: Handle = 0x8000_0003;
const HKPD: Handle = 0x8000_0004;

#[test]
fn create_set_query_delete_round() {
    let tmp = tempfile::tempdir().unwrap();
    let f = fixture(tmp.path());
    let (st, h) = f.engine.registry_create_key(HKU, "X\\Y");
    assert_eq!(st, StateCode::CreatedNew);
    let h = h.unwrap();
    assert!(!PREDEFINED_HANDLES.contains(h));
    assert_eq!(f.engine.key_path(h).as_deref(), Some("HKEY_USERS\\X\\Y"));

    let v = VirtualValue::new("a", vec![1, 2, 3], ValueType::Binary);
    assert_eq!(f.engine.registry_set_value(h, v.clone()), StateCode::Success);
    assert_eq!(f.engine.registry_query_value(h, "a"), (StateCode::Success, Some(v)));
    assert_eq!(f.engine.registry_delete_key(h), StateCode::Success);
    assert_eq!(f.engine.registry_query_value(h, "a"), (StateCode::InvalidHandle, None));
}

#[test]
fn allocator_reserves_predefined_handles() {
    let tmp = tempfile::tempdir().unwrap();
    let f = fixture(tmp.path());
    assert_eq!(f.engine.allocator().excluded_ranges(), vec![PREDEFINED_HANDLES]);
    // both stores share the one allocator
    assert_eq!(f.engine.allocator().consumer_count(), 2);
}

#[test]
fn open_materializes_host_keys_only() {
    let tmp = tempfile::tempdir().unwrap();
    let f = fixture(tmp.path());
    f.host.create_key("HKLM\\Software\\Vendor").unwrap();
    let (st, h) = f.engine.registry_open_key(HKLM, "Software\\Vendor");
    assert_eq!(st, StateCode::Success);
    let h = h.unwrap();
    assert!(f.engine.registry().contains(h));
    // the second open finds the virtual node
    assert_eq!(f.engine.registry_open_key(HKLM, "software\\vendor"), (StateCode::Success, Some(h)));

    assert_eq!(f.engine.registry_open_key(HKLM, "Software\\Missing"), (StateCode::NotFound, None));
    f.host.create_key("HKCU\\Software\\Sealed\\App").unwrap();
    assert_eq!(f.engine.registry_open_key(HKCU, "Software\\Sealed\\App"), (StateCode::NotFound, None));
    f.host.deny("HKLM\\Secret");
    assert_eq!(f.engine.registry_open_key(HKLM, "Secret"), (StateCode::AccessDenied, None));
    assert_eq!(f.engine.registry_open_key(12345, "x"), (StateCode::InvalidHandle, None));
}

#[test]
fn host_mirror_nodes_persist_and_reappear_after_delete() {
    let tmp = tempfile::tempdir().unwrap();
    let f = fixture(tmp.path());
    f.host.create_key("HKLM\\Software\\Vendor").unwrap();
    let (_, h) = f.engine.registry_open_key(HKLM, "Software\\Vendor");
    let h = h.unwrap();
    // a read-only open is enough to persist the mirror node
    assert_eq!(f.engine.registry_close_key(h), StateCode::Success);
    assert!(f.engine.registry().contains(h));
    f.engine.flush_all();
    assert_eq!(f.reg.batches()[0][0].action_type, crate::persist::ActionType::Add);

    // deleting drops the virtual node only; the host key stays and is mirrored again
    assert_eq!(f.engine.registry_delete_key(h), StateCode::Success);
    assert!(f.host.key_exists("HKLM\\Software\\Vendor").unwrap());
    let (st, again) = f.engine.registry_open_key(HKLM, "Software\\Vendor");
    assert_eq!(st, StateCode::Success);
    assert!(f.engine.registry().contains(again.unwrap()));
    f.engine.flush_all();
    let kinds: Vec<_> = f.reg.batches()[1].iter().map(|a| a.action_type).collect();
    assert_eq!(kinds, vec![crate::persist::ActionType::Remove, crate::persist::ActionType::Add]);
}

#[test]
fn create_reports_host_keys_as_existing() {
    let tmp = tempfile::tempdir().unwrap();
    let f = fixture(tmp.path());
    f.host.create_key("HKCU\\Software\\Vendor").unwrap();
    let (st, h) = f.engine.registry_create_key(HKCU, "Software\\Vendor");
    assert_eq!(st, StateCode::OpenedExisting);
    assert_eq!(f.engine.registry_create_key(HKCU, "Software\\Vendor"), (StateCode::OpenedExisting, h));
    // nothing was created on the host for a brand new key
    assert_eq!(f.engine.registry_create_key(HKCU, "Software\\Fresh").0, StateCode::CreatedNew);
    assert!(!f.host.key_exists("HKCU\\Software\\Fresh").unwrap());
}

#[test]
fn relative_opens_from_a_virtual_parent() {
    let tmp = tempfile::tempdir().unwrap();
    let f = fixture(tmp.path());
    let parent = f.engine.registry_create_key(HKU, "X").1.unwrap();
    let child = f.engine.registry_create_key(parent, "Y\\Z").1.unwrap();
    assert_eq!(f.engine.key_path(child).as_deref(), Some("HKEY_USERS\\X\\Y\\Z"));
    assert_eq!(f.engine.registry_open_key(parent, "y\\z"), (StateCode::Success, Some(child)));
    // deleting the parent takes the child along
    assert_eq!(f.engine.registry_delete_key(parent), StateCode::Success);
    assert_eq!(f.engine.registry_query_value(child, "v").0, StateCode::InvalidHandle);
}

#[test]
fn transparent_keys_pass_through_and_never_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let f = fixture(tmp.path());
    f.host.seed("HKEY_PERFORMANCE_DATA\\Counters", VirtualValue::dword("ticks", 1));
    let (st, h) = f.engine.registry_open_key(HKPD, "Counters");
    assert_eq!(st, StateCode::Success);
    let h = h.unwrap();
    assert!(f.engine.transparent().contains(h));
    assert!(!f.engine.registry().contains(h));

    for n in 2..5 {
        f.host.seed("HKEY_PERFORMANCE_DATA\\Counters", VirtualValue::dword("ticks", n));
        assert_eq!(f.engine.registry_query_value(h, "ticks").1.and_then(|v| v.as_dword()), Some(n));
    }
    assert_eq!(f.engine.registry_set_value(h, VirtualValue::dword("w", 9)), StateCode::Success);
    assert!(f.host.read_value("HKEY_PERFORMANCE_DATA\\Counters", "w").unwrap().is_some());
    assert_eq!(f.engine.registry_delete_value(h, "w"), StateCode::Success);
    assert_eq!(f.engine.registry_enum_values(h).0, StateCode::InvalidHandle);

    assert_eq!(f.engine.registry_close_key(h), StateCode::Success);
    assert_eq!(f.engine.registry_query_value(h, "ticks").0, StateCode::InvalidHandle);
    assert_eq!(f.engine.registry_close_key(h), StateCode::InvalidHandle);
    assert_eq!(f.reg.batch_count() + f.engine.bus().pending().1, 0);
}

#[test]
fn predefined_roots_route_by_hive() {
    let tmp = tempfile::tempdir().unwrap();
    let f = fixture(tmp.path());
    f.host.seed("HKEY_CURRENT_USER", VirtualValue::string("", "root default"));
    assert_eq!(f.engine.registry_query_value(HKCU, "").1.and_then(|v| v.as_string()).as_deref(), Some("root default"));
    assert_eq!(f.engine.registry_query_value(HKCU, "").0, StateCode::Success);
    assert_eq!(f.host.read_count(), 1);

    f.host.seed("HKEY_PERFORMANCE_DATA", VirtualValue::dword("Global", 7));
    assert_eq!(f.engine.registry_query_value(HKPD, "global").1.and_then(|v| v.as_dword()), Some(7));
    assert_eq!(f.engine.registry_delete_key(HKCU), StateCode::AccessDenied);
    assert_eq!(f.engine.registry_close_key(HKCU), StateCode::Success);
}

#[test]
fn virtual_keys_survive_close() {
    let tmp = tempfile::tempdir().unwrap();
    let f = fixture(tmp.path());
    let h = f.engine.registry_create_key(HKU, "X").1.unwrap();
    f.engine.registry_set_value(h, VirtualValue::dword("b", 2));
    f.engine.registry_set_value(h, VirtualValue::dword("A", 1));
    assert_eq!(f.engine.registry_close_key(h), StateCode::Success);
    let (st, values) = f.engine.registry_enum_values(h);
    assert_eq!(st, StateCode::Success);
    let names: Vec<&str> = values.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["A", "b"]);
    assert_eq!(f.engine.registry_delete_value(h, "a"), StateCode::Success);
    assert_eq!(f.engine.registry_delete_value(h, "a"), StateCode::NotFound);
}

#[test]
fn unknown_handles_are_invalid_everywhere() {
    let tmp = tempfile::tempdir().unwrap();
    let f = fixture(tmp.path());
    let bogus = 4242;
    assert_eq!(f.engine.registry_query_value(bogus, "x").0, StateCode::InvalidHandle);
    assert_eq!(f.engine.registry_set_value(bogus, VirtualValue::dword("x", 1)), StateCode::InvalidHandle);
    assert_eq!(f.engine.registry_delete_value(bogus, "x"), StateCode::InvalidHandle);
    assert_eq!(f.engine.registry_delete_key(bogus), StateCode::InvalidHandle);
    assert_eq!(f.engine.registry_close_key(bogus), StateCode::InvalidHandle);
    assert_eq!(f.engine.registry_create_key(bogus, "x").0, StateCode::InvalidHandle);
}

#[test]
fn load_all_hydrates_without_emitting() {
    let tmp = tempfile::tempdir().unwrap();
    let mut node = VirtualKeyNode::new(1, "HKEY_USERS\\Saved");
    node.put_value(VirtualValue::dword("v", 5));
    let fs = MemoryStore::with_items(vec![FileTableEntry::new("C:\\app\\a.txt", "Other\\C\\app\\a.txt", crate::filesystem::FileKind::File)]);
    let f = fixture_with(tmp.path(), fs, MemoryStore::with_items(vec![node]));
    assert_eq!(f.engine.load_all().unwrap(), LoadReport { files: 1, keys: 1 });
    assert_eq!(f.engine.bus().pending(), (0, 0));
    assert_eq!(f.engine.registry_open_key(HKU, "saved"), (StateCode::Success, Some(1)));
    assert_eq!(f.engine.lookup_file("c:\\APP\\a.txt").map(|e| e.value), Some("Other\\C\\app\\a.txt".to_string()));
    // the persisted handle is not handed out again
    assert_eq!(f.engine.registry_create_key(HKU, "New").1, Some(2));
}

#[test]
fn drop_flushes_pending_mutations() {
    let tmp = tempfile::tempdir().unwrap();
    let f = fixture(tmp.path());
    f.engine.registry_create_key(HKU, "X");
    f.engine.resolve_file_request(&FileRequest::new(
        "C:\\app\\new.txt",
        crate::filesystem::ResourceKind::File,
        crate::filesystem::CreationDisposition::CreateNew,
    ));
    let Fixture { engine, reg, fs, .. } = f;
    assert_eq!(reg.batch_count(), 0);
    drop(engine);
    assert_eq!(reg.batch_count(), 1);
    assert_eq!(fs.batch_count(), 1);
}

#[test]
fn file_backed_engine_restores_state_after_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let (handle, value) = {
        let engine = Engine::open(config(tmp.path())).unwrap();
        engine.load_all().unwrap();
        let h = engine.registry_create_key(HKU, "Persist\\Me").1.unwrap();
        engine.registry_set_value(h, VirtualValue::qword("big", 1 << 40));
        let e = engine.resolve_file_request(&FileRequest::new(
            "C:\\app\\state.bin",
            crate::filesystem::ResourceKind::File,
            crate::filesystem::CreationDisposition::CreateAlways,
        ));
        (h, e.value)
    };
    assert!(tmp.path().join("db").join("registry.log").exists());

    let engine = Engine::open(config(tmp.path())).unwrap();
    assert_eq!(engine.load_all().unwrap(), LoadReport { files: 1, keys: 1 });
    assert_eq!(engine.registry_open_key(HKU, "persist\\me"), (StateCode::Success, Some(handle)));
    let big = engine.registry_query_value(handle, "BIG").1.unwrap();
    assert_eq!(big.data, (1u64 << 40).to_le_bytes().to_vec());
    assert_eq!(engine.lookup_file("C:\\app\\state.bin").map(|e| e.value), Some(value));
}

#[test]
fn install_hooks_walks_the_table() {
    struct Recorder(Vec<String>);
    impl HookInstaller for Recorder {
        fn install(&mut self, hook: &crate::hooks::HookDescriptor) -> Result<()> {
            self.0.push(format!("{}!{}", hook.library, hook.symbol));
            Ok(())
        }
    }
    struct Refuser;
    impl HookInstaller for Refuser {
        fn install(&mut self, _: &crate::hooks::HookDescriptor) -> Result<()> { anyhow::bail!("no trampoline space") }
    }
    let tmp = tempfile::tempdir().unwrap();
    let f = fixture(tmp.path());
    let mut rec = Recorder(Vec::new());
    let n = f.engine.install_hooks(&mut rec).unwrap();
    assert_eq!(n, hook_table().len());
    assert!(rec.0.contains(&"advapi32.dll!RegOpenKeyExW".to_string()));
    let err = f.engine.install_hooks(&mut Refuser).unwrap_err();
    assert!(format!("{:#}", err).contains("no trampoline space"));
}
