//! Enumerates every (parent directory, name) link of a file inode and
//! records each as a file-level change (§4.5).

use crate::change_list::ChangeType;
use crate::context::{normalize_parent_ino, DiffContext};
use crate::directory::add_directory;

/// Walk every parent directory that links to `ino` and record one file
/// change per distinct name, then mark the inode `CTRACKED`.
pub fn add_modified_inode(ctx: &mut DiffContext, ino: u64) {
    let (nlink, mlinks, is_dir, sole_parent) = {
        let inode = ctx
            .child
            .get_inode(ino)
            .unwrap_or_else(|| panic!("file inode {ino} missing from child cache"));
        (inode.nlink, inode.flags.mlinks, inode.is_dir, inode.parent)
    };
    debug_assert!(!is_dir, "add_modified_inode is only for non-directory inodes");
    debug_assert!(nlink >= 1, "inode {ino} has no links");

    let links: Vec<(u64, u32)> = if mlinks {
        ctx.child.hard_links_for(ino).to_vec()
    } else {
        vec![(sole_parent, 1)]
    };

    debug_assert_eq!(
        links.iter().map(|(_, n)| *n).sum::<u32>(),
        nlink,
        "hard-link table entries for inode {ino} don't sum to its nlink"
    );

    let ctype = ChangeType::for_inode(ino, ctx.last_ino);

    for (parent_raw, plink) in links {
        let parent_ino = normalize_parent_ino(ctx, parent_raw);
        let dir_idx = match ctx.changes.find_index(parent_ino) {
            Some(idx) => idx,
            None => add_directory(ctx, parent_ino, None, ChangeType::Modified),
        };

        let names: Vec<String> = ctx
            .child
            .dirents_matching_ino(parent_ino, ino)
            .take(plink as usize)
            .map(|d| d.name.clone())
            .collect();
        debug_assert_eq!(
            names.len(),
            plink as usize,
            "expected {plink} distinct names for inode {ino} under {parent_ino}"
        );

        for name in names {
            ctx.changes.get_mut(dir_idx).add_file(&name, ctype);
        }
    }

    if let Some(inode) = ctx.child.get_inode_mut(ino) {
        inode.flags.ctracked = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_list::{ChangeList, ChangedDir, ChangeType as CT};
    use crate::store::Layer;

    #[test]
    fn single_link_file_reports_under_its_parent() {
        let mut parent = Layer::new(1, "base", None);
        parent.add_file(parent.root, "f", 2);
        let mut child = parent.fork(2, "child");
        // Pretend something dirtied this file's metadata this layer (e.g. a
        // setattr), which is what would make the driver visit it at all.
        child.copy_up(&parent, 2);
        let last_ino = parent.superblock.last_inode;

        let mut changes = ChangeList::new();
        changes.insert_root(ChangedDir::new(child.root, CT::Modified, "/".to_string()));
        {
            let mut ctx = DiffContext {
                child: &mut child,
                parent: &parent,
                changes: &mut changes,
                last_ino,
            };
            add_modified_inode(&mut ctx, 2);
        }
        let root = &changes.dirs()[0];
        assert_eq!(root.files.len(), 1);
        assert_eq!(root.files[0].name, "f");
        assert_eq!(root.files[0].ctype, CT::Modified);
        assert!(child.get_inode(2).unwrap().flags.ctracked);
    }

    #[test]
    fn multi_link_file_reports_under_every_parent() {
        let mut parent = Layer::new(1, "base", None);
        parent.add_file(parent.root, "f", 2);
        let a = parent.add_dir(parent.root, "a", 3, false);
        parent.add_link(a, "f", 2);
        let mut child = parent.fork(2, "child");
        child.copy_up(&parent, 2);
        child.add_dir(child.root, "b", 4, false);
        child.add_link(4, "f", 2);
        let last_ino = parent.superblock.last_inode;

        let mut changes = ChangeList::new();
        changes.insert_root(ChangedDir::new(child.root, CT::Modified, "/".to_string()));
        {
            let mut ctx = DiffContext {
                child: &mut child,
                parent: &parent,
                changes: &mut changes,
                last_ino,
            };
            add_modified_inode(&mut ctx, 2);
        }
        // parent dirs "a" and "b" should both have been created and carry
        // a record for "f".
        let a_dir = changes.dirs().iter().find(|d| d.path == "/a").unwrap();
        assert_eq!(a_dir.files[0].name, "f");
        let b_dir = changes.dirs().iter().find(|d| d.path == "/b").unwrap();
        assert_eq!(b_dir.files[0].name, "f");
    }
}
