use std::path::Path;

use crate::error::HostResult;

/// Host filesystem calls the table needs: an existence check for uniqueness
/// suffixing and directory creation for redirect targets.
pub trait HostFileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    fn create_dir_all(&self, path: &Path) -> HostResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl HostFileSystem for StdFileSystem {
    fn exists(&self, path: &Path) -> bool { path.exists() }

    fn create_dir_all(&self, path: &Path) -> HostResult<()> {
        std::fs::create_dir_all(path)?;
        Ok(())
    }
}
