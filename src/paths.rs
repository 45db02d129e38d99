//! Path identity: the pure mapping between absolute file paths and stable
//! node identifiers.
//!
//! A node is identified by its document's path relative to the watched root
//! with the extension stripped, using `/` separators on every platform. The
//! mapping is a bijection for the lifetime of the file; renaming a file is
//! observed as delete-then-add, never as a rename.

use std::{
    borrow::Cow,
    path::{Component, Path, PathBuf, MAIN_SEPARATOR_STR},
};

/// Identifier of a node: the document's root-relative path, extension
/// stripped, `/`-separated.
pub type NodeId = String;

/// The only document extension the engine recognizes.
pub const DOCUMENT_EXTENSION: &str = "md";

/// Utility function to replace separators and convert to unicode (via
/// to_string_lossy) on an os path.
pub fn os_path_to_string<P: AsRef<Path>>(os_path_ref: P) -> String {
    os_path_ref
        .as_ref()
        .components()
        .map(|c| match c {
            Component::RootDir => Cow::from("".to_string()),
            _ => c.as_os_str().to_string_lossy(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn string_to_os_path(path_string: &str) -> PathBuf {
    PathBuf::from(path_string.replace('/', MAIN_SEPARATOR_STR))
}

/// Compute the node identity for an absolute document path.
///
/// If the path does not fall under `root` (symlinked inputs can do this),
/// fall back to the bare file stem. Pure and total: every input yields an
/// identity.
pub fn node_id_for_path(absolute: &Path, root: &Path) -> NodeId {
    let relative = match absolute.strip_prefix(root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => {
            let fallback = absolute
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| absolute.to_path_buf());
            tracing::debug!(
                "node_id_for_path: {:?} is outside root {:?}, falling back to {:?}",
                absolute,
                root,
                fallback
            );
            fallback
        }
    };
    os_path_to_string(relative.with_extension(""))
}

/// Reconstruct the root-relative document path for a node identity.
///
/// Inverse of [`node_id_for_path`] for any identity the engine produced:
/// `node_id_for_path(&root.join(relative_path_for_id(id)), &root) == id`.
pub fn relative_path_for_id(id: &str) -> PathBuf {
    // Appended rather than set via with_extension: an id may itself contain
    // dots ("a.tar"), and with_extension would replace that segment.
    string_to_os_path(&format!("{id}.{DOCUMENT_EXTENSION}"))
}

/// Whether a path names a document the engine tracks.
///
/// Rejects hidden files, editor temp files, and anything without the
/// document extension. Directory components are checked separately by the
/// watcher via [`is_ignored_component`].
pub fn is_document_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') || name.ends_with('~') || name.ends_with(".tmp") {
        return false;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == DOCUMENT_EXTENSION)
        .unwrap_or(false)
}

/// Whether a directory component disqualifies everything beneath it:
/// hidden directories (version-control metadata included) and dependency
/// directories.
pub fn is_ignored_component(name: &str) -> bool {
    name.starts_with('.') || name == "node_modules" || name == "target"
}

/// Whether any ancestor component between `root` and `path` is ignored.
pub fn has_ignored_ancestor(path: &Path, root: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        // The final component is the file itself, judged by is_document_file.
        .take(relative.components().count().saturating_sub(1))
        .any(is_ignored_component)
}
