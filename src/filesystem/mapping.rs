//! Folder mapping rule
//! -------------------
//! Turns a requested host path into a path relative to the virtual root. The
//! longest configured host prefix wins (case-insensitive, whole components);
//! anything else lands under `Other\` with the drive colon and root dropped.
//! Output always uses `\` separators.

use crate::config::FolderMapping;

pub const FALLBACK_FOLDER: &str = "Other";

fn components(p: &str) -> Vec<&str> { p.split(['\\', '/']).filter(|s| !s.is_empty()).collect() }

#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    /// (lowercased prefix components, virtual folder), longest prefix first.
    rules: Vec<(Vec<String>, String)>,
}

impl PathMapper {
    pub fn new(mappings: &[FolderMapping]) -> Self {
        let mut rules: Vec<(Vec<String>, String)> = mappings
            .iter()
            .map(|m| {
                let prefix = components(&m.host_prefix).into_iter().map(|c| c.to_lowercase()).collect();
                (prefix, components(&m.virtual_folder).join("\\"))
            })
            .filter(|r: &(Vec<String>, String)| !r.0.is_empty())
            .collect();
        rules.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { rules }
    }

    pub fn map(&self, path: &str) -> String {
        let parts = components(path);
        for (prefix, folder) in &self.rules {
            if parts.len() >= prefix.len() && parts.iter().zip(prefix).all(|(p, q)| p.to_lowercase() == *q) {
                return join(folder, &parts[prefix.len()..]);
            }
        }
        let rest: Vec<&str> = parts
            .into_iter()
            .map(|p| p.strip_suffix(':').filter(|d| !d.is_empty()).unwrap_or(p))
            .collect();
        join(FALLBACK_FOLDER, &rest)
    }
}

fn join(folder: &str, rest: &[&str]) -> String {
    let mut out = folder.to_string();
    for r in rest {
        if !out.is_empty() { out.push('\\'); }
        out.push_str(r);
    }
    out
}

/// `dir\name_N.ext` for the given counter; the suffix goes on the stem, never the extension.
pub fn with_suffix(value: &str, n: u32) -> String {
    let (dir, file) = match value.rfind('\\') {
        Some(i) => (&value[..=i], &value[i + 1..]),
        None => ("", value),
    };
    match file.rfind('.') {
        Some(dot) if dot > 0 => format!("{}{}_{}{}", dir, &file[..dot], n, &file[dot..]),
        _ => format!("{}{}_{}", dir, file, n),
    }
}
