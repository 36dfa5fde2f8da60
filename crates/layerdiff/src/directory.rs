//! Builds `ChangedDir` records, ensuring ancestors always precede their
//! children (§4.4), and dispatches each directory to the comparator.

use crate::change_list::{ChangeType, ChangedDir};
use crate::comparator;
use crate::context::{normalize_parent_ino, DiffContext};
use crate::path::build_child_path;
use crate::store::Layer;

/// Find or create the `ChangedDir` for `ino`, creating every ancestor that
/// doesn't already exist first (§4.4 steps 1-3), and — the first time this
/// directory is created — walk its own contents (step 5).
///
/// `name` is the entry name under its parent; pass `None` to have it
/// resolved from the parent directory's contents (used for ancestors,
/// where the caller doesn't have the name at hand).
pub fn add_directory(
    ctx: &mut DiffContext,
    ino: u64,
    name: Option<&str>,
    ctype: ChangeType,
) -> usize {
    if let Some(idx) = ctx.changes.find_index(ino) {
        return idx;
    }

    if ino == ctx.child.root {
        let idx = add_directory_path(ctx, ino, None, name, ChangeType::Modified);
        mark_tracked_and_descend(ctx, ino, idx);
        return idx;
    }

    let parent_raw = ctx
        .child
        .get_inode(ino)
        .unwrap_or_else(|| panic!("directory inode {ino} missing from child cache"))
        .parent;
    let parent_ino = normalize_parent_ino(ctx, parent_raw);

    let parent_idx = match ctx.changes.find_index(parent_ino) {
        Some(idx) => idx,
        None => {
            let parent_ctype = ChangeType::for_inode(parent_ino, ctx.last_ino);
            add_directory(ctx, parent_ino, None, parent_ctype)
        }
    };

    let idx = add_directory_path(ctx, ino, Some(parent_idx), name, ctype);
    mark_tracked_and_descend(ctx, ino, idx);
    idx
}

fn mark_tracked_and_descend(ctx: &mut DiffContext, ino: u64, idx: usize) {
    let already_tracked = ctx
        .child
        .get_inode(ino)
        .map(|i| i.flags.ctracked)
        .unwrap_or(true);
    if !already_tracked {
        if let Some(inode) = ctx.child.get_inode_mut(ino) {
            inode.flags.ctracked = true;
        }
        add_directory_tree(ctx, ino, idx);
    }
}

/// Insert the new record immediately after its parent's (or, with
/// `parent_idx = None`, as the root) and resolve its path. Also implements
/// the "directory replaced a file of the same name" collapse from §4.4.
fn add_directory_path(
    ctx: &mut DiffContext,
    ino: u64,
    parent_idx: Option<usize>,
    name: Option<&str>,
    ctype: ChangeType,
) -> usize {
    match parent_idx {
        None => ctx
            .changes
            .insert_root(ChangedDir::new(ino, ctype, "/".to_string())),
        Some(pidx) => {
            let parent_ino = ctx.changes.get(pidx).ino;
            let parent_path = ctx.changes.get(pidx).path.clone();
            let resolved_name = match name {
                Some(n) => n.to_string(),
                None => resolve_name_from_parent(ctx.child, parent_ino, ino),
            };
            let path = build_child_path(&parent_path, &resolved_name);

            let mut final_ctype = ctype;
            let parent = ctx.changes.get_mut(pidx);
            if parent.ctype == ChangeType::Modified {
                if let Some(pos) = parent
                    .files
                    .iter()
                    .position(|f| f.name == resolved_name && f.ctype == ChangeType::Removed)
                {
                    parent.files.remove(pos);
                    final_ctype = ChangeType::Modified;
                }
            }

            ctx.changes
                .insert_after(pidx, ChangedDir::new(ino, final_ctype, path))
        }
    }
}

fn resolve_name_from_parent(child: &Layer, parent_dir_ino: u64, ino: u64) -> String {
    child
        .dirents_matching_ino(parent_dir_ino, ino)
        .next()
        .unwrap_or_else(|| panic!("no dirent for inode {ino} under parent {parent_dir_ino}"))
        .name
        .clone()
}

/// Picks the pre-image directory in the parent layer and runs the
/// comparator against it (§4.4 `add_directory_tree`).
fn add_directory_tree(ctx: &mut DiffContext, ino: u64, idx: usize) {
    let pdir_ino = if ino == ctx.child.root {
        Some(ctx.parent.root)
    } else {
        let path = ctx.changes.get(idx).path.clone();
        path_lookup(ctx.parent, &path)
    };

    let pdir_ino = pdir_ino.filter(|&p| ctx.parent.get_inode(p).map(|i| i.size > 0).unwrap_or(false));

    comparator::dispatch_compare(ctx, idx, ino, pdir_ino);
}

/// Tokenize on `/` and walk from `layer`'s root via dirent lookup; `None`
/// unless the full path resolves to a directory.
pub fn path_lookup(layer: &Layer, path: &str) -> Option<u64> {
    let mut ino = layer.root;
    for part in path.split('/').filter(|s| !s.is_empty()) {
        let next = layer.lookup_dirent(ino, part)?;
        if !layer.get_inode(next)?.is_dir {
            return None;
        }
        ino = next;
    }
    Some(ino)
}

/// Record one directory entry's change: descend for directories (unless
/// it's being removed), otherwise record a file-level change and, if
/// appropriate, pre-mark the inode `CTRACKED` so the driver's file pass
/// skips it (§4.3 `add_name`).
pub fn add_name(
    ctx: &mut DiffContext,
    dir_idx: usize,
    ino: u64,
    name: &str,
    is_dir: bool,
    ctype: ChangeType,
) {
    if is_dir && ctype != ChangeType::Removed {
        add_directory(ctx, ino, Some(name), ctype);
        return;
    }

    ctx.changes.get_mut(dir_idx).add_file(name, ctype);

    if ctype != ChangeType::Removed {
        let should_track = ctx
            .child
            .get_inode(ino)
            .map(|inode| ino > ctx.last_ino || !inode.flags.mlinks)
            .unwrap_or(false);
        if should_track {
            if let Some(inode) = ctx.child.get_inode_mut(ino) {
                inode.flags.ctracked = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_list::ChangeList;
    use crate::store::Layer;

    #[test]
    fn path_lookup_resolves_nested_dir() {
        let mut layer = Layer::new(1, "base", None);
        let d = layer.add_dir(layer.root, "d", 2, false);
        layer.add_file(d, "f", 3);
        assert_eq!(path_lookup(&layer, "/d"), Some(d));
        assert_eq!(path_lookup(&layer, "/"), Some(layer.root));
        assert_eq!(path_lookup(&layer, "/missing"), None);
        assert_eq!(path_lookup(&layer, "/d/f"), None); // not a directory
    }

    #[test]
    fn add_directory_creates_ancestors_first() {
        let mut parent = Layer::new(1, "base", None);
        let pd = parent.add_dir(parent.root, "a", 2, false);
        parent.add_dir(pd, "b", 3, false);
        let mut child = parent.fork(2, "child");
        // mutate child's /a/b to force it non-shared so it gets walked
        child.add_file(3, "new.txt", 10);

        let mut changes = ChangeList::new();
        let last_ino = parent.superblock.last_inode;
        {
            let mut ctx = DiffContext {
                child: &mut child,
                parent: &parent,
                changes: &mut changes,
                last_ino,
            };
            add_directory(&mut ctx, 3, None, ChangeType::Modified);
        }
        let inos: Vec<u64> = changes.dirs().iter().map(|d| d.ino).collect();
        assert_eq!(inos, vec![1, 2, 3]);
    }
}
