use std::collections::HashMap;

use crate::index::Handle;

/// Registry value kinds, numbered as the platform numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    None,
    Sz,
    ExpandSz,
    Binary,
    DwordLittleEndian,
    DwordBigEndian,
    Link,
    MultiSz,
    ResourceList,
    FullResourceDescriptor,
    ResourceRequirementsList,
    Qword,
    Invalid,
}

impl ValueType {
    pub fn code(&self) -> u32 {
        match self {
            ValueType::None => 0,
            ValueType::Sz => 1,
            ValueType::ExpandSz => 2,
            ValueType::Binary => 3,
            ValueType::DwordLittleEndian => 4,
            ValueType::DwordBigEndian => 5,
            ValueType::Link => 6,
            ValueType::MultiSz => 7,
            ValueType::ResourceList => 8,
            ValueType::FullResourceDescriptor => 9,
            ValueType::ResourceRequirementsList => 10,
            ValueType::Qword => 11,
            ValueType::Invalid => u32::MAX,
        }
    }

    pub fn from_code(code: u32) -> ValueType {
        match code {
            0 => ValueType::None,
            1 => ValueType::Sz,
            2 => ValueType::ExpandSz,
            3 => ValueType::Binary,
            4 => ValueType::DwordLittleEndian,
            5 => ValueType::DwordBigEndian,
            6 => ValueType::Link,
            7 => ValueType::MultiSz,
            8 => ValueType::ResourceList,
            9 => ValueType::FullResourceDescriptor,
            10 => ValueType::ResourceRequirementsList,
            11 => ValueType::Qword,
            _ => ValueType::Invalid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualValue {
    pub name: String,
    pub data: Vec<u8>,
    pub value_type: ValueType,
}

impl VirtualValue {
    pub fn new(name: impl Into<String>, data: Vec<u8>, value_type: ValueType) -> Self {
        Self { name: name.into(), data, value_type }
    }

    pub fn dword(name: impl Into<String>, v: u32) -> Self {
        Self::new(name, v.to_le_bytes().to_vec(), ValueType::DwordLittleEndian)
    }

    pub fn qword(name: impl Into<String>, v: u64) -> Self {
        Self::new(name, v.to_le_bytes().to_vec(), ValueType::Qword)
    }

    /// UTF-16LE, NUL terminated, like the wide registry APIs store strings.
    pub fn string(name: impl Into<String>, s: &str) -> Self {
        let mut data: Vec<u8> = s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        data.extend_from_slice(&[0, 0]);
        Self::new(name, data, ValueType::Sz)
    }

    pub fn as_dword(&self) -> Option<u32> {
        let b: [u8; 4] = self.data.get(0..4)?.try_into().ok()?;
        match self.value_type {
            ValueType::DwordLittleEndian => Some(u32::from_le_bytes(b)),
            ValueType::DwordBigEndian => Some(u32::from_be_bytes(b)),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self.value_type {
            ValueType::Sz | ValueType::ExpandSz | ValueType::Link => {
                let units: Vec<u16> = self.data.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
                let end = units.iter().position(|u| *u == 0).unwrap_or(units.len());
                String::from_utf16(&units[..end]).ok()
            }
            _ => None,
        }
    }
}

/// A key owned by the virtual registry store. Value names are matched
/// case-insensitively; the map is keyed by the lowercased name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualKeyNode {
    pub handle: Handle,
    pub path: String,
    pub values: HashMap<String, VirtualValue>,
}

impl VirtualKeyNode {
    pub fn new(handle: Handle, path: impl Into<String>) -> Self {
        Self { handle, path: path.into(), values: HashMap::new() }
    }

    pub fn get_value(&self, name: &str) -> Option<&VirtualValue> { self.values.get(&name.to_lowercase()) }

    pub fn put_value(&mut self, value: VirtualValue) { self.values.insert(value.name.to_lowercase(), value); }

    pub fn remove_value(&mut self, name: &str) -> Option<VirtualValue> { self.values.remove(&name.to_lowercase()) }
}
