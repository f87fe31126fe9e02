//! Key Path Parsing
//!
//! Resolves a backslash-separated path to the deepest existing key and
//! whatever part of the path is left over. With no starting key the first
//! component names a loaded hive:
//!
//! ```text
//! \SYSTEM\ControlSet001\Services\New
//!  ^^^^^^ hive root
//!         ^^^^^^^^^^^^^^^^^^^^^^ walked
//!                                ^^^ remaining
//! ```
//!
//! Leading, trailing and doubled separators are ignored. A marked key stops
//! the walk with `MarkedForDeletion`.

use alloc::string::String;
use alloc::vec::Vec;

use super::hive::HiveSet;
use super::index::OBJ_NAME_PATH_SEPARATOR;
use super::object::KeyId;
use super::status::CmStatus;

/// Result of a parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    /// Deepest key that exists
    pub key: KeyId,
    /// Unresolved components joined by `\`, empty when fully resolved
    pub remaining: String,
}

impl ParseResult {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Name resolution seam (the key object type's parse procedure)
pub type ParseProcedure = fn(&HiveSet, Option<KeyId>, &str) -> Result<ParseResult, CmStatus>;

/// Non-empty components of a path
pub fn cm_path_components(path: &str) -> impl Iterator<Item = &str> {
    path.split(OBJ_NAME_PATH_SEPARATOR).filter(|c| !c.is_empty())
}

/// Default parse procedure (CmpParseKey)
pub fn cm_parse_key(hives: &HiveSet, start: Option<KeyId>, path: &str) -> Result<ParseResult, CmStatus> {
    let mut components = cm_path_components(path).peekable();

    let mut current = match start {
        Some(key) => key,
        None => {
            let hive_name = components.next().ok_or(CmStatus::NameNotFound)?;
            let hive = hives.find_by_name(hive_name).ok_or(CmStatus::NameNotFound)?;
            let root = hives.get(hive).ok_or(CmStatus::NameNotFound)?.root();
            KeyId { hive, cell: root }
        }
    };

    let hive = hives.get(current.hive).ok_or(CmStatus::InvalidHandle)?;
    while let Some(&component) = components.peek() {
        match hive.find_subkey(current.cell, component)? {
            Some(cell) => {
                hive.check_open(cell)?;
                current.cell = cell;
                components.next();
            }
            None => break,
        }
    }

    let remaining: Vec<&str> = components.collect();
    Ok(ParseResult {
        key: current,
        remaining: remaining.join("\\"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cm::config::CmConfig;
    use crate::cm::hive::{CmHive, CreateOptions, HiveFlags};

    fn hive_set() -> HiveSet {
        let mut set = HiveSet::new();
        let mut hive = CmHive::new(0, "SYSTEM", HiveFlags::empty(), &CmConfig::new()).unwrap();
        let root = hive.root();
        let cs = hive.create_key(root, "ControlSet001", None, CreateOptions::empty()).unwrap();
        hive.create_key(cs, "Services", None, CreateOptions::empty()).unwrap();
        set.insert(hive).unwrap();
        set
    }

    #[test]
    fn test_absolute_path() {
        let set = hive_set();
        let result = cm_parse_key(&set, None, "\\system\\ControlSet001\\SERVICES").unwrap();
        assert!(result.is_complete());

        let hive = set.get(0).unwrap();
        assert_eq!(hive.key_path(result.key.cell).unwrap(), "\\SYSTEM\\ControlSet001\\Services");
    }

    #[test]
    fn test_remaining_path() {
        let set = hive_set();
        let result = cm_parse_key(&set, None, "\\SYSTEM\\ControlSet001\\\\New\\Deeper\\").unwrap();
        assert_eq!(result.remaining, "New\\Deeper");

        let hive = set.get(0).unwrap();
        assert_eq!(hive.key_node(result.key.cell).unwrap().name, "ControlSet001");
    }

    #[test]
    fn test_relative_path() {
        let set = hive_set();
        let cs = cm_parse_key(&set, None, "\\SYSTEM\\ControlSet001").unwrap().key;
        let services = cm_parse_key(&set, Some(cs), "Services").unwrap();
        assert!(services.is_complete());
        assert_ne!(services.key, cs);

        let same = cm_parse_key(&set, Some(cs), "").unwrap();
        assert_eq!(same.key, cs);
    }

    #[test]
    fn test_unknown_hive() {
        let set = hive_set();
        assert_eq!(cm_parse_key(&set, None, "\\SOFTWARE\\X"), Err(CmStatus::NameNotFound));
        assert_eq!(cm_parse_key(&set, None, "\\"), Err(CmStatus::NameNotFound));
    }

    #[test]
    fn test_marked_key_stops_walk() {
        let mut set = hive_set();
        let services = cm_parse_key(&set, None, "\\SYSTEM\\ControlSet001\\Services").unwrap().key;
        set.get_mut(0).unwrap().mark_for_delete(services.cell).unwrap();

        assert_eq!(
            cm_parse_key(&set, None, "\\SYSTEM\\ControlSet001\\Services"),
            Err(CmStatus::MarkedForDeletion)
        );
    }
}
