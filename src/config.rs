//! Engine configuration: where the virtual namespace lives, how the change bus
//! flushes, and which host folders map to which virtual folders.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maps a host folder prefix onto a folder under the virtual root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FolderMapping {
    pub host_prefix: String,
    pub virtual_folder: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory all redirected filesystem state lives under.
    pub virtual_root: PathBuf,
    /// Directory holding the filesystem and registry databases.
    pub database_dir: PathBuf,
    /// Interval between automatic flushes of the change bus.
    pub flush_interval_ms: u64,
    pub auto_flush: bool,
    /// Bounded wait for a queue lock at flush time; a flush that cannot get the
    /// lock within this deadline skips that queue.
    pub flush_lock_timeout_ms: u64,
    /// Temporary location passed through untouched. Defaults to the OS temp dir.
    pub temp_dir: Option<PathBuf>,
    pub folder_mappings: Vec<FolderMapping>,
    /// Registry key prefixes that are fully virtual (no host fallback).
    pub virtual_key_prefixes: Vec<String>,
    /// Rewrite a database log as one snapshot once it holds more batches than this.
    pub compact_after_batches: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            virtual_root: PathBuf::from("vroot"),
            database_dir: PathBuf::from("vdb"),
            flush_interval_ms: 500,
            auto_flush: true,
            flush_lock_timeout_ms: 50,
            temp_dir: None,
            folder_mappings: Vec::new(),
            virtual_key_prefixes: Vec::new(),
            compact_after_batches: 64,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path)
            .with_context(|| format!("read engine config: {}", path.display()))?;
        let cfg = serde_json::from_slice::<EngineConfig>(&bytes)
            .with_context(|| format!("parse engine config: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes).with_context(|| format!("write engine config: {}", path.display()))?;
        Ok(())
    }

    /// Overlay `APPVIRT_*` environment variables. Unparseable numbers are ignored.
    pub fn apply_env(mut self) -> Self {
        if let Ok(v) = std::env::var("APPVIRT_VIRTUAL_ROOT") { self.virtual_root = PathBuf::from(v); }
        if let Ok(v) = std::env::var("APPVIRT_DATABASE_DIR") { self.database_dir = PathBuf::from(v); }
        if let Some(ms) = std::env::var("APPVIRT_FLUSH_INTERVAL_MS").ok().and_then(|v| v.parse::<u64>().ok()) {
            self.flush_interval_ms = ms;
        }
        if let Ok(v) = std::env::var("APPVIRT_AUTO_FLUSH") {
            self.auto_flush = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        self
    }

    pub fn flush_interval(&self) -> Duration { Duration::from_millis(self.flush_interval_ms) }

    pub fn flush_lock_timeout(&self) -> Duration { Duration::from_millis(self.flush_lock_timeout_ms) }

    pub fn effective_temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn filesystem_db_path(&self) -> PathBuf { self.database_dir.join("filesystem.log") }

    pub fn registry_db_path(&self) -> PathBuf { self.database_dir.join("registry.log") }
}
