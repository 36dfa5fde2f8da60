//! A small in-memory reference implementation of the storage layer the real
//! diff engine would be embedded against.
//!
//! The production inode/dirent/layer store is explicitly out of scope for
//! this crate (see SPEC_FULL.md §1). What's here is just enough of a
//! stand-in — bucketed directories, a hard-link side table, per-layer
//! read/write locking — to drive and test the algorithm in isolation. An
//! embedder wires its own storage up to the same shapes (`Layer`, `Inode`,
//! `Dirent`) rather than using this module directly.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::change_list::ChangeList;

/// Bucket count for the "hashed" directory layout (mirrors `LC_DIRCACHE_SIZE`).
pub const DIR_CACHE_SIZE: usize = 8;

/// Every layer's root inode number.
pub const ROOT_INO: u64 = 1;

/// Deterministic stand-in for the storage layer's name hash. Both layers
/// bucket by the same function, which is what makes the cross-layer
/// same-order invariant (§3.1) hold for fixtures built by forking.
pub fn bucket_for(name: &str, buckets: usize) -> usize {
    if buckets <= 1 {
        return 0;
    }
    let sum: u32 = name.bytes().map(u32::from).sum();
    (sum as usize) % buckets
}

#[derive(Debug, Clone)]
pub struct Dirent {
    pub ino: u64,
    pub name: String,
    pub is_dir: bool,
}

impl Dirent {
    /// Name length, stored separately from `name` in the original (`di_size`);
    /// derived here since it can never diverge from `name.len()`.
    pub fn name_len(&self) -> u16 {
        self.name.len() as u16
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InodeFlags {
    /// Directory identical to the parent layer's: no changes beneath it.
    pub shared: bool,
    /// Directory uses the hash-bucketed layout rather than a flat list.
    pub dhashed: bool,
    /// File has links from more than one parent directory.
    pub mlinks: bool,
    /// Inode has been unlinked/rmdir'd in this layer.
    pub removed: bool,
    /// Diff-engine-owned: already represented in the current change list.
    pub ctracked: bool,
}

#[derive(Debug, Clone)]
pub struct Inode {
    pub ino: u64,
    pub parent: u64,
    pub nlink: u32,
    pub is_dir: bool,
    /// For directories: number of entries. Unused for files.
    pub size: u64,
    pub flags: InodeFlags,
    /// Only meaningful when `is_dir`. `buckets.len()` is 1 for the flat
    /// layout, `DIR_CACHE_SIZE` for the hashed layout.
    pub buckets: Vec<Vec<Dirent>>,
}

impl Inode {
    fn new_dir(ino: u64, parent: u64, hashed: bool) -> Self {
        let n = if hashed { DIR_CACHE_SIZE } else { 1 };
        Self {
            ino,
            parent,
            nlink: 2,
            is_dir: true,
            size: 0,
            flags: InodeFlags {
                dhashed: hashed,
                ..Default::default()
            },
            buckets: vec![Vec::new(); n],
        }
    }

    fn new_file(ino: u64, parent: u64) -> Self {
        Self {
            ino,
            parent,
            nlink: 1,
            is_dir: false,
            size: 0,
            flags: InodeFlags::default(),
            buckets: Vec::new(),
        }
    }

    pub fn max_buckets(&self) -> usize {
        if self.flags.dhashed {
            DIR_CACHE_SIZE
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Superblock {
    /// Highest inode number assigned in this layer so far.
    pub last_inode: u64,
}

/// A single copy-on-write layer: its inode cache, directory contents, and
/// hard-link side table.
#[derive(Debug, Clone)]
pub struct Layer {
    pub id: u64,
    pub name: String,
    pub root: u64,
    pub parent_id: Option<u64>,
    pub superblock: Superblock,
    pub inodes: HashMap<u64, Inode>,
    /// ino -> [(parent_dir_ino, nlink_from_that_parent)], only populated for
    /// inodes with `MLINKS` set.
    pub hard_links: HashMap<u64, Vec<(u64, u32)>>,
    pub removed: bool,
    /// Reported verbatim in "swap layers on commit" mode.
    pub fs_size: u64,
    /// Accumulated change list for the in-progress (or just-finished, not
    /// yet drained) diff against `parent_id`. Empty means "no diff built
    /// yet" — either never requested, or the previous one was fully drained
    /// and freed.
    pub changes: ChangeList,
}

impl Layer {
    pub fn new(id: u64, name: impl Into<String>, parent_id: Option<u64>) -> Self {
        let mut inodes = HashMap::new();
        let mut root = Inode::new_dir(ROOT_INO, ROOT_INO, false);
        root.nlink = 2;
        inodes.insert(ROOT_INO, root);
        Self {
            id,
            name: name.into(),
            root: ROOT_INO,
            parent_id,
            superblock: Superblock {
                last_inode: ROOT_INO,
            },
            inodes,
            hard_links: HashMap::new(),
            removed: false,
            fs_size: 0,
            changes: ChangeList::new(),
        }
    }

    /// Fork a child layer that starts out sharing `self`'s directory
    /// structure: every directory is cloned with `SHARED` set and
    /// `CTRACKED` cleared. File inodes are **not** copied — mirroring a
    /// real copy-on-write layer, an unmodified file's content and metadata
    /// live only in the parent, and is never duplicated into the child's
    /// own inode cache. Dirents referencing such files still appear in the
    /// (cloned) directory listings; only `get_inode` on the file's own ino
    /// would miss in the child until something dirties it.
    ///
    /// The caller mutates the returned child — via `add_dir`/`add_file` for
    /// new entries, or `adopt_inode` to copy up an existing file before
    /// changing its links — to build a test fixture. The parent is left
    /// untouched.
    pub fn fork(&self, child_id: u64, name: impl Into<String>) -> Layer {
        let mut inodes = HashMap::new();
        for (ino, inode) in &self.inodes {
            if inode.is_dir {
                let mut dir = inode.clone();
                dir.flags.shared = true;
                dir.flags.ctracked = false;
                inodes.insert(*ino, dir);
            }
        }
        Layer {
            id: child_id,
            name: name.into(),
            root: self.root,
            parent_id: Some(self.id),
            superblock: self.superblock,
            inodes,
            hard_links: HashMap::new(),
            removed: false,
            fs_size: self.fs_size,
            changes: ChangeList::new(),
        }
    }

    /// Copy an inode (and its hard-link table entry, if any) from `parent`
    /// into this layer's own cache, as a real copy-up would do just before
    /// the inode is dirtied. The caller mutates it afterward (e.g. via
    /// `add_link`). A no-op if `parent` has no such inode.
    pub fn copy_up(&mut self, parent: &Layer, ino: u64) {
        let Some(inode) = parent.get_inode(ino) else {
            return;
        };
        self.inodes.insert(ino, inode.clone());
        if let Some(links) = parent.hard_links.get(&ino) {
            self.hard_links.insert(ino, links.clone());
        }
    }

    pub fn get_inode(&self, ino: u64) -> Option<&Inode> {
        self.inodes.get(&ino)
    }

    pub fn get_inode_mut(&mut self, ino: u64) -> Option<&mut Inode> {
        self.inodes.get_mut(&ino)
    }

    /// Look up a child by name within a directory; `None` if absent.
    pub fn lookup_dirent(&self, dir_ino: u64, name: &str) -> Option<u64> {
        let dir = self.inodes.get(&dir_ino)?;
        dir.buckets
            .iter()
            .flatten()
            .find(|d| d.name == name)
            .map(|d| d.ino)
    }

    /// All dirents referencing `ino` directly under `dir_ino`, in bucket
    /// order — a simplification of the original's cursor-based
    /// `get_dirent(parent, ino, &hash, prev)` that returns the same names in
    /// the same order without threading a manual cursor through callers.
    pub fn dirents_matching_ino<'a>(
        &'a self,
        dir_ino: u64,
        ino: u64,
    ) -> impl Iterator<Item = &'a Dirent> + 'a {
        self.inodes
            .get(&dir_ino)
            .into_iter()
            .flat_map(|d| d.buckets.iter())
            .flatten()
            .filter(move |d| d.ino == ino)
    }

    pub fn hard_links_for(&self, ino: u64) -> &[(u64, u32)] {
        self.hard_links.get(&ino).map(Vec::as_slice).unwrap_or(&[])
    }

    fn bump_entry_count(&mut self, dir_ino: u64, delta: i64) {
        if let Some(dir) = self.inodes.get_mut(&dir_ino) {
            dir.size = (dir.size as i64 + delta).max(0) as u64;
        }
    }

    fn insert_dirent(&mut self, dir_ino: u64, dirent: Dirent) {
        let max = self
            .inodes
            .get(&dir_ino)
            .map(Inode::max_buckets)
            .unwrap_or(1);
        let idx = bucket_for(&dirent.name, max);
        if let Some(dir) = self.inodes.get_mut(&dir_ino) {
            dir.flags.shared = false;
            dir.buckets[idx].push(dirent);
        }
        self.bump_entry_count(dir_ino, 1);
    }

    /// Create a new directory under `parent` and link it in.
    pub fn add_dir(&mut self, parent: u64, name: &str, ino: u64, hashed: bool) -> u64 {
        self.inodes
            .insert(ino, Inode::new_dir(ino, parent, hashed));
        self.insert_dirent(
            parent,
            Dirent {
                ino,
                name: name.to_string(),
                is_dir: true,
            },
        );
        self.superblock.last_inode = self.superblock.last_inode.max(ino);
        ino
    }

    /// Create a new regular file under `parent` and link it in.
    pub fn add_file(&mut self, parent: u64, name: &str, ino: u64) -> u64 {
        self.inodes.insert(ino, Inode::new_file(ino, parent));
        self.insert_dirent(
            parent,
            Dirent {
                ino,
                name: name.to_string(),
                is_dir: false,
            },
        );
        self.superblock.last_inode = self.superblock.last_inode.max(ino);
        ino
    }

    /// Add a hard link of an existing inode under `parent` with `name`.
    /// Bumps `nlink`, flags the inode `MLINKS`, and records the per-parent
    /// link count in the hard-link side table. The first time a file grows
    /// a second link, its original parent is backfilled into the table too,
    /// so `hard_links_for` always sums to `nlink`.
    pub fn add_link(&mut self, parent: u64, name: &str, ino: u64) {
        let is_dir = self.inodes.get(&ino).is_some_and(|i| i.is_dir);
        if let Some(inode) = self.inodes.get(&ino) {
            if !inode.flags.mlinks && !self.hard_links.contains_key(&ino) {
                let original_parent = inode.parent;
                self.hard_links.insert(ino, vec![(original_parent, 1)]);
            }
        }
        self.insert_dirent(
            parent,
            Dirent {
                ino,
                name: name.to_string(),
                is_dir,
            },
        );
        if let Some(inode) = self.inodes.get_mut(&ino) {
            inode.nlink += 1;
            inode.flags.mlinks = true;
        }
        let entries = self.hard_links.entry(ino).or_default();
        if let Some(entry) = entries.iter_mut().find(|(p, _)| *p == parent) {
            entry.1 += 1;
        } else {
            entries.push((parent, 1));
        }
    }

    /// Remove a name from a directory (unlink/rmdir). Does not free the
    /// inode; callers that want to simulate full removal should also drop
    /// `nlink` to zero and set `REMOVED` once all links are gone.
    pub fn remove_dirent(&mut self, dir_ino: u64, name: &str) -> Option<u64> {
        let max = self
            .inodes
            .get(&dir_ino)
            .map(Inode::max_buckets)
            .unwrap_or(1);
        let idx = bucket_for(name, max);
        let removed_ino = {
            let dir = self.inodes.get_mut(&dir_ino)?;
            dir.flags.shared = false;
            let bucket = &mut dir.buckets[idx];
            let pos = bucket.iter().position(|d| d.name == name)?;
            Some(bucket.remove(pos).ino)
        };
        if removed_ino.is_some() {
            self.bump_entry_count(dir_ino, -1);
        }
        removed_ino
    }

    /// Rename a dirent in place: same bucket rules, new name/parent.
    pub fn rename_dirent(&mut self, old_parent: u64, old_name: &str, new_parent: u64, new_name: &str) {
        if let Some(ino) = self.remove_dirent(old_parent, old_name) {
            let is_dir = self.inodes.get(&ino).is_some_and(|i| i.is_dir);
            self.insert_dirent(
                new_parent,
                Dirent {
                    ino,
                    name: new_name.to_string(),
                    is_dir,
                },
            );
            if let Some(inode) = self.inodes.get_mut(&ino) {
                inode.parent = new_parent;
            }
        }
    }

    pub fn mark_removed(&mut self, ino: u64) {
        if let Some(inode) = self.inodes.get_mut(&ino) {
            inode.flags.removed = true;
        }
    }

    /// Iterate every inode in the cache, in no particular order (mirrors
    /// `lc_layerDiff`'s two cache passes, which don't depend on bucket order).
    pub fn all_inodes(&self) -> impl Iterator<Item = &Inode> {
        self.inodes.values()
    }

    /// Clear `CTRACKED` from every inode — run once a diff has been fully
    /// drained (§4.6 step 6, §3.3).
    pub fn clear_ctracked(&mut self) {
        for inode in self.inodes.values_mut() {
            inode.flags.ctracked = false;
        }
    }
}

/// Registry of layers plus the global "root layer" lock and restart flag.
pub struct Store {
    layers: HashMap<u64, RwLock<Layer>>,
    names: HashMap<String, u64>,
    root_layer_id: u64,
    restarted: RwLock<bool>,
}

impl Store {
    pub fn new(root_layer_id: u64) -> Self {
        Self {
            layers: HashMap::new(),
            names: HashMap::new(),
            root_layer_id,
            restarted: RwLock::new(false),
        }
    }

    pub fn register(&mut self, layer: Layer) {
        self.names.insert(layer.name.clone(), layer.id);
        self.layers.insert(layer.id, RwLock::new(layer));
    }

    pub fn resolve_name(&self, name: &str) -> Option<u64> {
        self.names.get(name).copied()
    }

    pub fn layer(&self, id: u64) -> Option<&RwLock<Layer>> {
        self.layers.get(&id)
    }

    pub fn root_layer_id(&self) -> u64 {
        self.root_layer_id
    }

    pub fn is_restarted(&self) -> bool {
        *self.restarted.read().unwrap()
    }

    pub fn set_restarted(&self, value: bool) {
        *self.restarted.write().unwrap() = value;
    }

    /// Tear down a registered layer: flag it removed and free its
    /// accumulated change list. Mirrors what an embedder calls when a layer
    /// is deleted out from under the diff engine (§2 item 7 "Teardown",
    /// §3.4's "freed ... when the layer is torn down"). Returns `false` if
    /// `id` isn't registered.
    pub fn remove_layer(&self, id: u64) -> bool {
        let Some(lock) = self.layers.get(&id) else {
            return false;
        };
        let mut layer = lock.write().unwrap();
        layer.changes.free_list();
        layer.removed = true;
        true
    }
}
