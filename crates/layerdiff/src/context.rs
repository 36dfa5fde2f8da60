//! Shared state threaded through one diff-building run.

use crate::change_list::ChangeList;
use crate::store::Layer;

/// Everything the directory builder, comparator, and hard-link walker need
/// while building a change list: the child layer under its write lock, the
/// parent layer under its read lock, the change list under construction,
/// and the parent's `lastIno` snapshot (§4.6 step 1).
///
/// `changes` is a freestanding list rather than `&mut child.changes`
/// directly — building it against a detached `ChangeList` and only
/// installing it on the layer once complete sidesteps holding two
/// overlapping `&mut` borrows into the same `Layer`.
pub struct DiffContext<'a> {
    pub child: &'a mut Layer,
    pub parent: &'a Layer,
    pub changes: &'a mut ChangeList,
    pub last_ino: u64,
}

/// Cross-layer parent translation (§4.4 step 1, §9): an inode's recorded
/// parent may still point at the *parent* layer's root if it was never
/// rewritten after the directory was copied across the layer boundary.
pub(crate) fn normalize_parent_ino(ctx: &DiffContext, ino: u64) -> u64 {
    if ino == ctx.parent.root {
        ctx.child.root
    } else {
        ino
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_list::ChangeList;
    use crate::store::{Inode, InodeFlags, Superblock};
    use std::collections::HashMap;

    /// A bare single-inode layer with an arbitrary root ino, built by
    /// hand instead of through `Layer::new`/`Layer::fork` (both of which
    /// always assign `ROOT_INO` to every layer) so a test can actually put
    /// `parent.root != child.root` and exercise the translation.
    fn bare_layer(id: u64, root: u64) -> Layer {
        let mut inodes = HashMap::new();
        inodes.insert(
            root,
            Inode {
                ino: root,
                parent: root,
                nlink: 2,
                is_dir: true,
                size: 0,
                flags: InodeFlags::default(),
                buckets: vec![Vec::new()],
            },
        );
        Layer {
            id,
            name: format!("layer{id}"),
            root,
            parent_id: None,
            superblock: Superblock { last_inode: root },
            inodes,
            hard_links: HashMap::new(),
            removed: false,
            fs_size: 0,
            changes: ChangeList::new(),
        }
    }

    #[test]
    fn normalize_parent_ino_rewrites_parent_root_to_child_root() {
        let parent = bare_layer(1, 100);
        let mut child = bare_layer(2, 200);
        let mut changes = ChangeList::new();
        let ctx = DiffContext {
            child: &mut child,
            parent: &parent,
            changes: &mut changes,
            last_ino: 0,
        };
        assert_eq!(normalize_parent_ino(&ctx, 100), 200);
        assert_eq!(normalize_parent_ino(&ctx, 999), 999);
    }
}
