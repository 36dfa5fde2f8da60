//! Directory comparison: the ordered walk (Strategy A) used when parent and
//! child agree on directory identity and layout, and the name-lookup scan
//! (Strategy B) used otherwise (§4.3).

use crate::change_list::ChangeType;
use crate::context::DiffContext;
use crate::directory::add_name;
use crate::store::Dirent;

/// Picks Strategy A when `pdir_ino` is the same directory (by identity,
/// allowing for the root-to-root case) with a matching `DHASHED` layout,
/// Strategy B otherwise.
pub fn dispatch_compare(ctx: &mut DiffContext, dir_idx: usize, dir_ino: u64, pdir_ino: Option<u64>) {
    let use_strategy_a = match pdir_ino {
        Some(p) => {
            let same_identity =
                dir_ino == p || (dir_ino == ctx.child.root && p == ctx.parent.root);
            let child_hashed = ctx
                .child
                .get_inode(dir_ino)
                .map(|i| i.flags.dhashed)
                .unwrap_or(false);
            let parent_hashed = ctx
                .parent
                .get_inode(p)
                .map(|i| i.flags.dhashed)
                .unwrap_or(false);
            same_identity && child_hashed == parent_hashed
        }
        None => false,
    };

    if use_strategy_a {
        process_directory(ctx, dir_idx, dir_ino, pdir_ino.expect("checked above"));
    } else {
        compare_directory(ctx, dir_idx, dir_ino, pdir_ino);
    }
}

/// Strategy A: exploit same-order-by-ino bucketing to walk both directories
/// once per bucket, in lockstep.
fn process_directory(ctx: &mut DiffContext, dir_idx: usize, dir_ino: u64, pdir_ino: u64) {
    let shared = ctx
        .child
        .get_inode(dir_ino)
        .map(|i| i.flags.shared)
        .unwrap_or(false);
    if shared {
        return;
    }

    let max = ctx
        .child
        .get_inode(dir_ino)
        .map(|i| i.max_buckets())
        .unwrap_or(1);

    for bucket_i in 0..max {
        let parent_bucket: Vec<Dirent> = ctx
            .parent
            .get_inode(pdir_ino)
            .and_then(|i| i.buckets.get(bucket_i))
            .cloned()
            .unwrap_or_default();
        let child_bucket: Vec<Dirent> = ctx
            .child
            .get_inode(dir_ino)
            .and_then(|i| i.buckets.get(bucket_i))
            .cloned()
            .unwrap_or_default();

        let mut d = 0usize;
        let mut consumed = vec![false; child_bucket.len()];

        for p in &parent_bucket {
            let start = d;
            while d < child_bucket.len() && child_bucket[d].ino != p.ino {
                d += 1;
            }
            if d < child_bucket.len() {
                let c = &child_bucket[d];
                if c.name_len() != p.name_len() || c.name != p.name {
                    add_name(ctx, dir_idx, p.ino, &p.name, p.is_dir, ChangeType::Removed);
                    add_name(ctx, dir_idx, c.ino, &c.name, c.is_dir, ChangeType::Added);
                }
                consumed[d] = true;
                d += 1;
            } else {
                // No match anywhere ahead of the cursor: p only exists in the
                // parent. Leave the cursor where it was so the next parent
                // entry still gets to search the entries we just skipped.
                add_name(ctx, dir_idx, p.ino, &p.name, p.is_dir, ChangeType::Removed);
                d = start;
            }
        }

        // Entries `insert_dirent` ever only appends, so anything never
        // consumed against a parent entry is a genuine addition in this
        // layer, wherever it falls in the bucket.
        for (i, c) in child_bucket.iter().enumerate() {
            if !consumed[i] {
                add_name(ctx, dir_idx, c.ino, &c.name, c.is_dir, ChangeType::Added);
            }
        }
    }
}

/// Strategy B: two independent name-lookup scans, each short-circuiting
/// once it has visited as many entries as the directory declares.
fn compare_directory(ctx: &mut DiffContext, dir_idx: usize, dir_ino: u64, pdir_ino: Option<u64>) {
    let dir_size = ctx.child.get_inode(dir_ino).map(|i| i.size).unwrap_or(0);
    let child_entries: Vec<Dirent> = ctx
        .child
        .get_inode(dir_ino)
        .map(|i| i.buckets.iter().flatten().cloned().collect())
        .unwrap_or_default();

    let mut visited = 0u64;
    for c in &child_entries {
        if visited >= dir_size {
            break;
        }
        let found = pdir_ino.and_then(|p| ctx.parent.lookup_dirent(p, &c.name));
        if found.is_none() {
            add_name(ctx, dir_idx, c.ino, &c.name, c.is_dir, ChangeType::Added);
        }
        visited += 1;
    }

    if let Some(p) = pdir_ino {
        let pdir_size = ctx.parent.get_inode(p).map(|i| i.size).unwrap_or(0);
        let parent_entries: Vec<Dirent> = ctx
            .parent
            .get_inode(p)
            .map(|i| i.buckets.iter().flatten().cloned().collect())
            .unwrap_or_default();

        let mut pvisited = 0u64;
        for pe in &parent_entries {
            if pvisited >= pdir_size {
                break;
            }
            if ctx.child.lookup_dirent(dir_ino, &pe.name).is_none() {
                add_name(ctx, dir_idx, pe.ino, &pe.name, pe.is_dir, ChangeType::Removed);
            }
            pvisited += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_list::{ChangeList, ChangedDir};
    use crate::store::Layer;

    fn one_dir_ctx<'a>(
        child: &'a mut Layer,
        parent: &'a Layer,
        changes: &'a mut ChangeList,
        last_ino: u64,
    ) -> DiffContext<'a> {
        DiffContext {
            child,
            parent,
            changes,
            last_ino,
        }
    }

    #[test]
    fn strategy_b_pure_add_when_no_preimage() {
        let parent = Layer::new(1, "base", None);
        let mut child = parent.fork(2, "child");
        child.add_file(child.root, "new.txt", 10);

        let mut changes = ChangeList::new();
        changes.insert_root(ChangedDir::new(
            child.root,
            ChangeType::Modified,
            "/".to_string(),
        ));
        {
            let mut ctx = one_dir_ctx(&mut child, &parent, &mut changes, parent.superblock.last_inode);
            compare_directory(&mut ctx, 0, child.root, None);
        }
        let root = &changes.dirs()[0];
        assert_eq!(root.files.len(), 1);
        assert_eq!(root.files[0].name, "new.txt");
        assert_eq!(root.files[0].ctype, ChangeType::Added);
    }

    #[test]
    fn strategy_a_matches_unchanged_entry_and_appends_new() {
        let mut parent = Layer::new(1, "base", None);
        parent.add_file(parent.root, "a.txt", 2);
        let mut child = parent.fork(2, "child");
        child.add_file(child.root, "b.txt", 10);

        let mut changes = ChangeList::new();
        changes.insert_root(ChangedDir::new(child.root, ChangeType::Modified, "/".to_string()));
        {
            let mut ctx = one_dir_ctx(&mut child, &parent, &mut changes, parent.superblock.last_inode);
            process_directory(&mut ctx, 0, child.root, parent.root);
        }
        let root = &changes.dirs()[0];
        assert_eq!(root.files.len(), 1);
        assert_eq!(root.files[0].name, "b.txt");
        assert_eq!(root.files[0].ctype, ChangeType::Added);
    }

    #[test]
    fn strategy_a_detects_rename_of_same_inode() {
        let mut parent = Layer::new(1, "base", None);
        parent.add_file(parent.root, "old.txt", 2);
        let mut child = parent.fork(2, "child");
        child.rename_dirent(child.root, "old.txt", child.root, "new.txt");

        let mut changes = ChangeList::new();
        changes.insert_root(ChangedDir::new(child.root, ChangeType::Modified, "/".to_string()));
        {
            let mut ctx = one_dir_ctx(&mut child, &parent, &mut changes, parent.superblock.last_inode);
            process_directory(&mut ctx, 0, child.root, parent.root);
        }
        let root = &changes.dirs()[0];
        assert!(root
            .files
            .iter()
            .any(|f| f.name == "old.txt" && f.ctype == ChangeType::Removed));
        assert!(root
            .files
            .iter()
            .any(|f| f.name == "new.txt" && f.ctype == ChangeType::Added));
    }

    #[test]
    fn strategy_a_restarts_cursor_after_unmatched_parent_entry() {
        // Removing a middle entry must not stop a later, still-present
        // entry from matching: the cursor has to pick back up where it
        // left off rather than staying advanced past it.
        let mut parent = Layer::new(1, "base", None);
        parent.add_file(parent.root, "a", 2);
        parent.add_file(parent.root, "b", 3);
        parent.add_file(parent.root, "c", 4);
        let mut child = parent.fork(2, "child");
        child.remove_dirent(child.root, "b");

        let mut changes = ChangeList::new();
        changes.insert_root(ChangedDir::new(child.root, ChangeType::Modified, "/".to_string()));
        {
            let mut ctx = one_dir_ctx(&mut child, &parent, &mut changes, parent.superblock.last_inode);
            process_directory(&mut ctx, 0, child.root, parent.root);
        }
        let root = &changes.dirs()[0];
        assert_eq!(root.files.len(), 1);
        assert_eq!(root.files[0].name, "b");
        assert_eq!(root.files[0].ctype, ChangeType::Removed);
    }

    #[test]
    fn strategy_b_pure_remove() {
        let mut parent = Layer::new(1, "base", None);
        parent.add_file(parent.root, "a.txt", 2);
        parent.add_file(parent.root, "b.txt", 3);
        let mut child = parent.fork(2, "child");
        child.remove_dirent(child.root, "b.txt");

        let mut changes = ChangeList::new();
        changes.insert_root(ChangedDir::new(
            child.root,
            ChangeType::Modified,
            "/".to_string(),
        ));
        {
            let mut ctx = one_dir_ctx(
                &mut child,
                &parent,
                &mut changes,
                parent.superblock.last_inode,
            );
            compare_directory(&mut ctx, 0, child.root, Some(parent.root));
        }
        let root = &changes.dirs()[0];
        assert_eq!(root.files.len(), 1);
        assert_eq!(root.files[0].name, "b.txt");
        assert_eq!(root.files[0].ctype, ChangeType::Removed);
    }
}
