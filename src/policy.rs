//! Access policy: decides per resource whether calls pass through to the host,
//! read through, fall back to the host once, or stay fully virtual.

use once_cell::sync::Lazy;
use path_absolutize::Absolutize;
use regex::Regex;
use std::path::Path;

use crate::config::EngineConfig;
use crate::registry::path::{canonical_key_path, hive_of, is_same_or_descendant, Hive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMechanism {
    /// Both directions pass through to the host; nothing is cached.
    Transparent,
    /// Reads go to the host live; writes land in the virtual store.
    TransparentRead,
    /// Create-and-copy: a host value is read once, cached into the virtual
    /// node, and served from there afterwards.
    VirtualWithFallback,
    /// No host involvement at all.
    Virtual,
}

static DEVICE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(con|prn|aux|nul|conin\$|conout\$|clock\$|com[1-9]|lpt[1-9])(\.[^/]*)?$")
        .unwrap_or_else(|_| Regex::new("^$").unwrap())
});

/// Separator- and case-insensitive form used for path prefix comparisons.
pub(crate) fn fold_path(p: &str) -> String {
    let mut s = p.replace('\\', "/").to_lowercase();
    while s.len() > 1 && s.ends_with('/') { s.pop(); }
    s
}

pub(crate) fn has_folded_prefix(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() { return false; }
    path == prefix || (path.len() > prefix.len() && path.starts_with(prefix) && (prefix.ends_with('/') || path.as_bytes()[prefix.len()] == b'/'))
}

fn absolute_folded(p: &Path) -> String {
    let abs = p.absolutize().map(|a| a.to_path_buf()).unwrap_or_else(|_| p.to_path_buf());
    fold_path(&abs.to_string_lossy())
}

#[derive(Debug, Clone)]
pub struct AccessPolicy {
    virtual_root: String,
    temp_dir: String,
    virtual_key_prefixes: Vec<String>,
}

impl AccessPolicy {
    pub fn new(virtual_root: &Path, temp_dir: &Path, virtual_key_prefixes: &[String]) -> Self {
        Self {
            virtual_root: absolute_folded(virtual_root),
            temp_dir: absolute_folded(temp_dir),
            virtual_key_prefixes: virtual_key_prefixes.iter().map(|p| canonical_key_path(p)).collect(),
        }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(&cfg.virtual_root, &cfg.effective_temp_dir(), &cfg.virtual_key_prefixes)
    }

    /// Classify a registry key path.
    pub fn classify(&self, key_path: &str) -> AccessMechanism {
        let canonical = canonical_key_path(key_path);
        if self.virtual_key_prefixes.iter().any(|p| is_same_or_descendant(&canonical, p)) {
            return AccessMechanism::Virtual;
        }
        match hive_of(&canonical) {
            Some(Hive::CurrentUser) | Some(Hive::Users) => AccessMechanism::VirtualWithFallback,
            Some(Hive::LocalMachine) | Some(Hive::ClassesRoot) | Some(Hive::CurrentConfig) => AccessMechanism::TransparentRead,
            Some(Hive::PerformanceData) | Some(Hive::DynData) => AccessMechanism::Transparent,
            // Unknown roots have nothing on the host to fall back to.
            None => AccessMechanism::Virtual,
        }
    }

    /// False for raw devices, pipes and console names, and for paths already under
    /// the virtual root.
    pub fn is_virtualizable(&self, path: &str) -> bool {
        if path.trim().is_empty() || is_device_path(path) { return false; }
        !self.is_in_virtual_namespace(path)
    }

    pub fn is_in_virtual_namespace(&self, path: &str) -> bool {
        has_folded_prefix(&fold_path(path), &self.virtual_root)
    }

    pub fn is_temporary(&self, path: &str) -> bool {
        has_folded_prefix(&fold_path(path), &self.temp_dir)
    }

    pub fn virtual_root(&self) -> &str { &self.virtual_root }
}

/// Device namespace paths (`\\.\X`), named pipes and reserved console/device names.
pub fn is_device_path(path: &str) -> bool {
    let folded = fold_path(path);
    if folded.starts_with("//./") || folded.starts_with("//?/pipe/") || folded.starts_with("//?/globalroot") {
        return true;
    }
    let last = folded.rsplit('/').next().unwrap_or("");
    DEVICE_NAME.is_match(last)
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod policy_tests;
