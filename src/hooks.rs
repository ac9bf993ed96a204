//! Hook boundary
//! -------------
//! The engine does not patch functions itself. An external `HookInstaller`
//! wires each entry of `hook_table()` to its target symbol; intercepted calls
//! arrive here as `InterceptedCall` values and leave as `HookResult`s carrying
//! the platform error code the guest expects.

use anyhow::Result;

use crate::engine::Engine;
use crate::error::{StateCode, ERROR_SUCCESS};
use crate::filesystem::{FileKind, FileRequest, FileTableEntry};
use crate::index::Handle;
use crate::registry::VirtualValue;

pub type HookHandler = fn(&Engine, InterceptedCall) -> HookResult;

#[derive(Clone, Copy)]
pub struct HookDescriptor {
    pub library: &'static str,
    pub symbol: &'static str,
    pub handler: HookHandler,
}

impl std::fmt::Debug for HookDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookDescriptor").field("library", &self.library).field("symbol", &self.symbol).finish()
    }
}

pub trait HookInstaller {
    fn install(&mut self, hook: &HookDescriptor) -> Result<()>;
}

const ADVAPI: &str = "advapi32.dll";
const KERNEL: &str = "kernel32.dll";

static HOOKS: [HookDescriptor; 14] = [
    HookDescriptor { library: ADVAPI, symbol: "RegOpenKeyExW", handler: dispatch },
    HookDescriptor { library: ADVAPI, symbol: "RegCreateKeyExW", handler: dispatch },
    HookDescriptor { library: ADVAPI, symbol: "RegQueryValueExW", handler: dispatch },
    HookDescriptor { library: ADVAPI, symbol: "RegSetValueExW", handler: dispatch },
    HookDescriptor { library: ADVAPI, symbol: "RegDeleteValueW", handler: dispatch },
    HookDescriptor { library: ADVAPI, symbol: "RegDeleteKeyW", handler: dispatch },
    HookDescriptor { library: ADVAPI, symbol: "RegCloseKey", handler: dispatch },
    HookDescriptor { library: ADVAPI, symbol: "RegEnumValueW", handler: dispatch },
    HookDescriptor { library: KERNEL, symbol: "CreateFileW", handler: dispatch },
    HookDescriptor { library: KERNEL, symbol: "CreateDirectoryW", handler: dispatch },
    HookDescriptor { library: KERNEL, symbol: "DeleteFileW", handler: dispatch },
    HookDescriptor { library: KERNEL, symbol: "RemoveDirectoryW", handler: dispatch },
    HookDescriptor { library: KERNEL, symbol: "LoadLibraryExW", handler: dispatch },
    HookDescriptor { library: KERNEL, symbol: "GetFileAttributesW", handler: dispatch },
];

/// Registry and file APIs the engine handles.
pub fn hook_table() -> &'static [HookDescriptor] { &HOOKS }

#[derive(Debug, Clone, PartialEq)]
pub enum InterceptedCall {
    RegOpenKey { parent: Handle, sub_key: String },
    RegCreateKey { parent: Handle, sub_key: String },
    RegQueryValue { key: Handle, name: String },
    RegSetValue { key: Handle, value: VirtualValue },
    RegDeleteValue { key: Handle, name: String },
    /// Deletes `sub_key` below `parent`; an empty sub key deletes `parent` itself.
    RegDeleteKey { parent: Handle, sub_key: String },
    RegCloseKey { key: Handle },
    RegEnumValues { key: Handle },
    /// CreateFile, CreateDirectory and attribute queries.
    OpenFile(FileRequest),
    DeleteFile { path: String },
    RemoveDirectory { path: String },
    LoadLibrary { name: String, full_path: String },
}

/// Outcome handed back to the hook trampoline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookResult {
    /// Platform error code.
    pub code: u32,
    pub handle: Option<Handle>,
    /// `REG_CREATED_NEW_KEY` / `REG_OPENED_EXISTING_KEY` for key creation.
    pub disposition: Option<u32>,
    pub value: Option<VirtualValue>,
    pub values: Vec<VirtualValue>,
    /// Path the original call should be forwarded with.
    pub path: Option<String>,
}

impl HookResult {
    fn state(st: StateCode) -> Self { Self { code: st.to_win32(), ..Default::default() } }

    fn forward(path: String) -> Self { Self { code: ERROR_SUCCESS, path: Some(path), ..Default::default() } }

    pub fn is_success(&self) -> bool { self.code == ERROR_SUCCESS }
}

fn forward_entry(engine: &Engine, entry: &FileTableEntry) -> HookResult {
    HookResult::forward(engine.file_host_path(entry).to_string_lossy().into_owned())
}

fn delete_path(engine: &Engine, path: String, kind: FileKind) -> HookResult {
    match engine.lookup_file(&path) {
        Some(mut entry) => {
            if kind == FileKind::Directory { entry.kind = FileKind::Directory; }
            let res = forward_entry(engine, &entry);
            engine.delete_file_entry(&entry);
            res
        }
        None => HookResult::forward(path),
    }
}

pub fn dispatch(engine: &Engine, call: InterceptedCall) -> HookResult {
    match call {
        InterceptedCall::RegOpenKey { parent, sub_key } => {
            let (st, handle) = engine.registry_open_key(parent, &sub_key);
            HookResult { handle, ..HookResult::state(st) }
        }
        InterceptedCall::RegCreateKey { parent, sub_key } => {
            let (st, handle) = engine.registry_create_key(parent, &sub_key);
            HookResult { handle, disposition: st.disposition(), ..HookResult::state(st) }
        }
        InterceptedCall::RegQueryValue { key, name } => {
            let (st, value) = engine.registry_query_value(key, &name);
            HookResult { value, ..HookResult::state(st) }
        }
        InterceptedCall::RegSetValue { key, value } => HookResult::state(engine.registry_set_value(key, value)),
        InterceptedCall::RegDeleteValue { key, name } => HookResult::state(engine.registry_delete_value(key, &name)),
        InterceptedCall::RegDeleteKey { parent, sub_key } => {
            if sub_key.trim_matches(['\\', '/']).is_empty() {
                return HookResult::state(engine.registry_delete_key(parent));
            }
            let (st, handle) = engine.registry_open_key(parent, &sub_key);
            let Some(h) = handle else { return HookResult::state(st) };
            let st = engine.registry_delete_key(h);
            if !st.is_success() {
                engine.registry_close_key(h);
            }
            HookResult::state(st)
        }
        InterceptedCall::RegCloseKey { key } => HookResult::state(engine.registry_close_key(key)),
        InterceptedCall::RegEnumValues { key } => {
            let (st, values) = engine.registry_enum_values(key);
            HookResult { values, ..HookResult::state(st) }
        }
        InterceptedCall::OpenFile(req) => forward_entry(engine, &engine.resolve_file_request(&req)),
        InterceptedCall::DeleteFile { path } => delete_path(engine, path, FileKind::File),
        InterceptedCall::RemoveDirectory { path } => delete_path(engine, path, FileKind::Directory),
        InterceptedCall::LoadLibrary { name, full_path } => {
            forward_entry(engine, &engine.resolve_file_request(&FileRequest::library(name, full_path)))
        }
    }
}
