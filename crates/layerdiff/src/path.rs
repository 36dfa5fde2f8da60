//! Composes absolute paths on the fly as the change list is built (§4.2).

/// Append a child name to its parent record's path.
///
/// `parent_path` is `"/"` at the root and otherwise has no trailing slash.
pub fn build_child_path(parent_path: &str, name: &str) -> String {
    if parent_path == "/" {
        format!("/{name}")
    } else {
        format!("{parent_path}/{name}")
    }
}
