#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FileKind {
    #[default]
    Unspecified,
    File,
    Directory,
}

/// Maps a requested path to the path the call is redirected to. For redirected
/// entries `value` is relative to the virtual root; pass-through entries carry
/// the original path in both fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTableEntry {
    pub key: String,
    pub value: String,
    pub kind: FileKind,
}

impl FileTableEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>, kind: FileKind) -> Self {
        Self { key: key.into(), value: value.into(), kind }
    }

    pub fn passthrough(path: &str, kind: FileKind) -> Self { Self::new(path, path, kind) }

    pub fn is_redirected(&self) -> bool { self.key != self.value }
}

/// What the guest asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceKind {
    #[default]
    Unspecified,
    File,
    Directory,
    Library,
}

impl ResourceKind {
    pub fn file_kind(&self) -> FileKind {
        match self {
            ResourceKind::Directory => FileKind::Directory,
            ResourceKind::File | ResourceKind::Library => FileKind::File,
            ResourceKind::Unspecified => FileKind::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CreationDisposition {
    CreateNew,
    CreateAlways,
    OpenAlways,
    #[default]
    OpenExisting,
    TruncateExisting,
}

impl CreationDisposition {
    /// True when the caller intends to create the resource if it is missing.
    pub fn may_create(&self) -> bool {
        matches!(self, CreationDisposition::CreateNew | CreationDisposition::CreateAlways | CreationDisposition::OpenAlways)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRequest {
    /// Name as passed by the guest (may be relative or a bare library name).
    pub name: String,
    /// Fully qualified path, when the caller could resolve one.
    pub full_path: String,
    pub kind: ResourceKind,
    pub disposition: CreationDisposition,
}

impl FileRequest {
    pub fn new(full_path: impl Into<String>, kind: ResourceKind, disposition: CreationDisposition) -> Self {
        let full_path = full_path.into();
        Self { name: full_path.clone(), full_path, kind, disposition }
    }

    pub fn library(name: impl Into<String>, full_path: impl Into<String>) -> Self {
        Self { name: name.into(), full_path: full_path.into(), kind: ResourceKind::Library, disposition: CreationDisposition::OpenExisting }
    }

    /// Path used as the table key: the full path if known, else the raw name.
    pub fn lookup_path(&self) -> &str {
        if self.full_path.is_empty() { &self.name } else { &self.full_path }
    }
}
