//! Canonical forward-slash paths for filter rules
//!
//! Journal entries arrive in native syntax (`\dir\file.txt`, `C:\dir\file.txt`,
//! `/dir/file.txt`). Filter rules need a volume-relative path with `/`
//! separators, so normalization:
//! - Strips a `\\?\` verbatim prefix and a drive prefix (`C:`)
//! - Splits on both `/` and `\`
//! - Drops empty and `.` components, resolves `..` lexically (never above root)
//!
//! The result has no leading `/`; rule formatting adds it.

use std::fmt;

/// Why a journal line could not become a filter path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryError {
    /// Empty or whitespace-only line
    Blank,
    /// Line contains a NUL character
    ContainsNul,
    /// Line names the volume root itself
    NoComponents,
}

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryError::Blank => f.write_str("blank line"),
            EntryError::ContainsNul => f.write_str("line contains NUL characters"),
            EntryError::NoComponents => f.write_str("line names the volume root"),
        }
    }
}

/// Normalize one journal line to a volume-relative forward-slash path
pub fn normalize_entry(line: &str) -> Result<String, EntryError> {
    if line.contains('\0') {
        return Err(EntryError::ContainsNul);
    }
    if line.trim().is_empty() {
        return Err(EntryError::Blank);
    }

    let rest = strip_volume_prefix(line);

    let mut components: Vec<&str> = Vec::new();
    for component in rest.split(['/', '\\']) {
        match component {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            name => components.push(name),
        }
    }

    if components.is_empty() {
        return Err(EntryError::NoComponents);
    }

    Ok(components.join("/"))
}

/// Ancestors of a normalized path, nearest first
///
/// `a/b/c.txt` yields `a/b`, then `a`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.rmatch_indices('/').map(move |(idx, _)| &path[..idx])
}

fn strip_volume_prefix(line: &str) -> &str {
    let line = line
        .strip_prefix(r"\\?\")
        .or_else(|| line.strip_prefix("//?/"))
        .unwrap_or(line);

    let bytes = line.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        &line[2..]
    } else {
        line
    }
}
