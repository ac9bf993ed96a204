//! Serialized row schema. This is the single (de)serialization boundary: the
//! file table is stored as `(key, value, kind)` rows, the registry as
//! `(handle, path)` key rows joined to `(handle, name, data, type)` value rows.

use serde::{Deserialize, Serialize};

use crate::filesystem::types::{FileKind, FileTableEntry};
use crate::persist::{ActionType, DatabaseAction};
use crate::registry::types::{ValueType, VirtualKeyNode, VirtualValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowAction { Add, Update, Remove }

impl From<ActionType> for RowAction {
    fn from(a: ActionType) -> Self {
        match a { ActionType::Add => RowAction::Add, ActionType::Update => RowAction::Update, ActionType::Remove => RowAction::Remove }
    }
}

impl From<RowAction> for ActionType {
    fn from(a: RowAction) -> Self {
        match a { RowAction::Add => ActionType::Add, RowAction::Update => ActionType::Update, RowAction::Remove => ActionType::Remove }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRow {
    pub key: String,
    pub value: String,
    pub kind: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRow {
    pub handle: u32,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRow {
    pub handle: u32,
    pub name: String,
    pub data: Vec<u8>,
    pub value_type: u32,
}

/// One persisted batch of file table actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBatch {
    pub actions: Vec<(RowAction, FileRow)>,
}

/// One persisted batch of registry actions. Value rows of a key travel with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryBatch {
    pub actions: Vec<(RowAction, KeyRow, Vec<ValueRow>)>,
}

fn kind_code(k: FileKind) -> u8 {
    match k { FileKind::Unspecified => 0, FileKind::File => 1, FileKind::Directory => 2 }
}

fn kind_from_code(c: u8) -> FileKind {
    match c { 1 => FileKind::File, 2 => FileKind::Directory, _ => FileKind::Unspecified }
}

impl From<&FileTableEntry> for FileRow {
    fn from(e: &FileTableEntry) -> Self { Self { key: e.key.clone(), value: e.value.clone(), kind: kind_code(e.kind) } }
}

impl From<FileRow> for FileTableEntry {
    fn from(r: FileRow) -> Self { FileTableEntry::new(r.key, r.value, kind_from_code(r.kind)) }
}

pub fn node_to_rows(n: &VirtualKeyNode) -> (KeyRow, Vec<ValueRow>) {
    let mut values: Vec<ValueRow> = n
        .values
        .values()
        .map(|v| ValueRow { handle: n.handle, name: v.name.clone(), data: v.data.clone(), value_type: v.value_type.code() })
        .collect();
    values.sort_by(|a, b| a.name.cmp(&b.name));
    (KeyRow { handle: n.handle, path: n.path.clone() }, values)
}

/// Join a key row with its value rows. Rows for other handles are ignored.
pub fn rows_to_node(key: KeyRow, values: Vec<ValueRow>) -> VirtualKeyNode {
    let mut node = VirtualKeyNode::new(key.handle, key.path);
    for v in values.into_iter().filter(|v| v.handle == key.handle) {
        node.put_value(VirtualValue::new(v.name, v.data, ValueType::from_code(v.value_type)));
    }
    node
}

impl FileBatch {
    pub fn from_actions(batch: &[DatabaseAction<FileTableEntry>]) -> Self {
        Self { actions: batch.iter().map(|a| (a.action_type.into(), FileRow::from(&a.item))).collect() }
    }

    pub fn into_actions(self) -> Vec<DatabaseAction<FileTableEntry>> {
        self.actions.into_iter().map(|(a, r)| DatabaseAction::new(r.into(), a.into())).collect()
    }
}

impl RegistryBatch {
    pub fn from_actions(batch: &[DatabaseAction<VirtualKeyNode>]) -> Self {
        Self {
            actions: batch
                .iter()
                .map(|a| {
                    let (k, v) = node_to_rows(&a.item);
                    (a.action_type.into(), k, v)
                })
                .collect(),
        }
    }

    pub fn into_actions(self) -> Vec<DatabaseAction<VirtualKeyNode>> {
        self.actions.into_iter().map(|(a, k, v)| DatabaseAction::new(rows_to_node(k, v), a.into())).collect()
    }
}
