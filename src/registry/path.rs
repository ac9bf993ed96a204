//! Registry key path helpers: hive names, predefined handles and canonical form.
//! Canonical paths use `\` separators, no leading/trailing/doubled separators and
//! the full hive name as first segment. Comparison is case-insensitive.

use crate::index::{Handle, IndexRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hive {
    ClassesRoot,
    CurrentUser,
    LocalMachine,
    Users,
    PerformanceData,
    CurrentConfig,
    DynData,
}

/// Pseudo-handles reserved for predefined hives. The allocator never emits these.
pub const PREDEFINED_HANDLES: IndexRange = IndexRange { start: 0x8000_0000, end: 0x8000_00FF };

impl Hive {
    pub const ALL: [Hive; 7] = [
        Hive::ClassesRoot,
        Hive::CurrentUser,
        Hive::LocalMachine,
        Hive::Users,
        Hive::PerformanceData,
        Hive::CurrentConfig,
        Hive::DynData,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Hive::ClassesRoot => "HKEY_CLASSES_ROOT",
            Hive::CurrentUser => "HKEY_CURRENT_USER",
            Hive::LocalMachine => "HKEY_LOCAL_MACHINE",
            Hive::Users => "HKEY_USERS",
            Hive::PerformanceData => "HKEY_PERFORMANCE_DATA",
            Hive::CurrentConfig => "HKEY_CURRENT_CONFIG",
            Hive::DynData => "HKEY_DYN_DATA",
        }
    }

    fn alias(&self) -> Option<&'static str> {
        match self {
            Hive::ClassesRoot => Some("HKCR"),
            Hive::CurrentUser => Some("HKCU"),
            Hive::LocalMachine => Some("HKLM"),
            Hive::Users => Some("HKU"),
            Hive::CurrentConfig => Some("HKCC"),
            Hive::PerformanceData | Hive::DynData => None,
        }
    }

    pub fn predefined_handle(&self) -> Handle {
        match self {
            Hive::ClassesRoot => 0x8000_0000,
            Hive::CurrentUser => 0x8000_0001,
            Hive::LocalMachine => 0x8000_0002,
            Hive::Users => 0x8000_0003,
            Hive::PerformanceData => 0x8000_0004,
            Hive::CurrentConfig => 0x8000_0005,
            Hive::DynData => 0x8000_0006,
        }
    }

    pub fn from_predefined_handle(handle: Handle) -> Option<Hive> {
        Hive::ALL.iter().copied().find(|h| h.predefined_handle() == handle)
    }

    /// Parse a hive from its full name or short alias, case-insensitively.
    pub fn parse(segment: &str) -> Option<Hive> {
        Hive::ALL.iter().copied().find(|h| {
            h.name().eq_ignore_ascii_case(segment) || h.alias().map(|a| a.eq_ignore_ascii_case(segment)).unwrap_or(false)
        })
    }
}

/// Canonicalize a key path. Hive aliases expand to full names; other segments keep their case.
pub fn canonical_key_path(path: &str) -> String {
    let mut segs = path.split(['\\', '/']).filter(|s| !s.is_empty());
    let mut out = String::with_capacity(path.len() + 16);
    if let Some(first) = segs.next() {
        match Hive::parse(first) {
            Some(h) => out.push_str(h.name()),
            None => out.push_str(first),
        }
    }
    for s in segs {
        out.push('\\');
        out.push_str(s);
    }
    out
}

/// Join a parent key path and a relative sub key into a canonical path.
pub fn join_key_path(parent: &str, sub_key: &str) -> String {
    if sub_key.trim_matches(['\\', '/']).is_empty() {
        return canonical_key_path(parent);
    }
    canonical_key_path(&format!("{}\\{}", parent, sub_key))
}

pub fn hive_of(path: &str) -> Option<Hive> {
    path.split(['\\', '/']).find(|s| !s.is_empty()).and_then(Hive::parse)
}

/// Lowercased canonical form used as a lookup key.
#[inline]
pub fn key_id(path: &str) -> String { canonical_key_path(path).to_lowercase() }

/// True when `path` is `ancestor` itself or lies below it (both canonical).
pub fn is_same_or_descendant(path: &str, ancestor: &str) -> bool {
    let p = path.to_lowercase();
    let a = ancestor.to_lowercase();
    p == a || (p.len() > a.len() && p.starts_with(&a) && p.as_bytes()[a.len()] == b'\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_expand_and_separators_collapse() {
        assert_eq!(canonical_key_path("HKCU/Software//Vendor\\"), "HKEY_CURRENT_USER\\Software\\Vendor");
        assert_eq!(canonical_key_path("\\hkey_local_machine\\X"), "HKEY_LOCAL_MACHINE\\X");
        assert_eq!(canonical_key_path("NotAHive\\x"), "NotAHive\\x");
    }

    #[test]
    fn join_and_hive() {
        let p = join_key_path("HKEY_USERS", "X\\Y");
        assert_eq!(p, "HKEY_USERS\\X\\Y");
        assert_eq!(join_key_path("HKCU\\A", ""), "HKEY_CURRENT_USER\\A");
        assert_eq!(hive_of(&p), Some(Hive::Users));
        assert_eq!(hive_of("Bogus\\x"), None);
    }

    #[test]
    fn predefined_handles_round_trip_and_are_reserved() {
        for h in Hive::ALL {
            assert_eq!(Hive::from_predefined_handle(h.predefined_handle()), Some(h));
            assert!(PREDEFINED_HANDLES.contains(h.predefined_handle()));
        }
        assert_eq!(Hive::from_predefined_handle(7), None);
    }

    #[test]
    fn descendant_check_respects_segment_boundary() {
        assert!(is_same_or_descendant("HKEY_USERS\\X\\Y", "hkey_users\\x"));
        assert!(is_same_or_descendant("HKEY_USERS\\X", "HKEY_USERS\\X"));
        assert!(!is_same_or_descendant("HKEY_USERS\\XY", "HKEY_USERS\\X"));
    }
}
