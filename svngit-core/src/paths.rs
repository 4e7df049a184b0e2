//! Repository path normalization helpers
//!
//! Internally every path is stored in normalized form: no leading or
//! trailing slash, `""` for the repository root.

/// Normalize a client-supplied path
pub fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a normalized base with a child component
pub fn join(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, name)
    }
}

/// Parent directory of a normalized path (`None` for the root)
pub fn parent(path: &str) -> Option<&str> {
    if path.is_empty() {
        return None;
    }
    Some(match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    })
}

/// Final component of a normalized path
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Whether `ancestor` is `path` itself or a directory above it
pub fn is_ancestor_or_self(ancestor: &str, path: &str) -> bool {
    if ancestor.is_empty() || ancestor == path {
        return true;
    }
    path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/')
}

/// Whether two touched paths conflict for commit purposes
///
/// A change to a directory conflicts with any change at or below it, in
/// either direction.
pub fn conflicts(a: &str, b: &str) -> bool {
    is_ancestor_or_self(a, b) || is_ancestor_or_self(b, a)
}
