//! Virtual filesystem: request -> redirected path table, the folder mapping
//! rule used to compute redirect targets, and the host filesystem accessor.

pub mod host;
pub mod mapping;
pub mod table;
pub mod types;

pub use host::{HostFileSystem, StdFileSystem};
pub use mapping::PathMapper;
pub use table::VirtualFileSystemTable;
pub use types::{CreationDisposition, FileKind, FileRequest, FileTableEntry, ResourceKind};
