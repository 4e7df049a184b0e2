//! SVN property handling
//!
//! File and directory properties are derived from what Git can represent:
//! the executable bit and symlink mode. `svn:mergeinfo` is accepted and
//! passed through opaquely; anything else that Git cannot persist is
//! rejected rather than silently dropped.

use std::collections::BTreeMap;

use crate::error::{BridgeError, Result};
use crate::object::FileMode;

pub const SVN_EXECUTABLE: &str = "svn:executable";
pub const SVN_SPECIAL: &str = "svn:special";
pub const SVN_MERGEINFO: &str = "svn:mergeinfo";
pub const SVN_LOG: &str = "svn:log";
pub const SVN_AUTHOR: &str = "svn:author";
pub const SVN_DATE: &str = "svn:date";

/// Properties derived from a file's Git mode
pub fn for_mode(mode: FileMode) -> BTreeMap<String, String> {
    let mut props = BTreeMap::new();
    match mode {
        FileMode::Executable => {
            props.insert(SVN_EXECUTABLE.to_string(), "*".to_string());
        }
        FileMode::Symlink => {
            props.insert(SVN_SPECIAL.to_string(), "*".to_string());
        }
        FileMode::Normal | FileMode::Directory => {}
    }
    props
}

/// Whether a property change can be honored by a Git-backed store
pub fn check_storable(name: &str) -> Result<()> {
    match name {
        SVN_EXECUTABLE | SVN_SPECIAL | SVN_MERGEINFO => Ok(()),
        _ => Err(BridgeError::PropertyUnsupported {
            name: name.to_string(),
        }),
    }
}

/// Apply property changes to a file mode
///
/// Setting `svn:executable` flips to 100755, deleting it flips back;
/// `svn:special` selects symlink mode the same way.
pub fn apply_to_mode(mode: FileMode, name: &str, value: Option<&str>) -> FileMode {
    match (name, value.is_some()) {
        (SVN_EXECUTABLE, true) => FileMode::Executable,
        (SVN_EXECUTABLE, false) if mode == FileMode::Executable => FileMode::Normal,
        (SVN_SPECIAL, true) => FileMode::Symlink,
        (SVN_SPECIAL, false) if mode == FileMode::Symlink => FileMode::Normal,
        _ => mode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_properties() {
        assert!(for_mode(FileMode::Normal).is_empty());
        assert_eq!(for_mode(FileMode::Executable).get(SVN_EXECUTABLE).unwrap(), "*");
        assert_eq!(for_mode(FileMode::Symlink).get(SVN_SPECIAL).unwrap(), "*");
    }

    #[test]
    fn test_storable_check() {
        assert!(check_storable(SVN_EXECUTABLE).is_ok());
        assert!(check_storable(SVN_MERGEINFO).is_ok());
        assert!(matches!(
            check_storable("user:custom"),
            Err(BridgeError::PropertyUnsupported { .. })
        ));
    }

    #[test]
    fn test_apply_to_mode() {
        let m = apply_to_mode(FileMode::Normal, SVN_EXECUTABLE, Some("*"));
        assert_eq!(m, FileMode::Executable);
        let m = apply_to_mode(m, SVN_EXECUTABLE, None);
        assert_eq!(m, FileMode::Normal);
        // Deleting svn:executable on a plain file is a no-op.
        assert_eq!(apply_to_mode(FileMode::Normal, SVN_EXECUTABLE, None), FileMode::Normal);
    }
}
