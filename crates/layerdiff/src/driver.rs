//! Entry point tying the directory builder, comparator, and hard-link
//! walker together into the request-level protocol (§4.6, §6).

use log::{debug, info, trace};

use crate::change_list::{ChangeList, ChangeType};
use crate::context::DiffContext;
use crate::directory::add_directory;
use crate::error::{DiffError, Result};
use crate::hardlink::add_modified_inode;
use crate::reply::reply_diff;
use crate::store::{Layer, Store};

/// Engine-wide settings an embedder would normally load from the same
/// config file as the rest of the host system.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// Size in bytes of one wire frame (`BLOCK` in §6).
    pub block_size: usize,
    /// When true, diffing is bypassed entirely: `layer_diff` on a real
    /// layer name replies with the child layer's raw size instead (§4.6).
    pub swap_layers_on_commit: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: 4096,
            swap_layers_on_commit: false,
        }
    }
}

/// `layer_diff(req, name, size)` — the engine's single entry point (§6).
///
/// `size` is accepted for interface fidelity (the transport validates it
/// against the protocol mode) but does not otherwise affect behavior here.
pub fn layer_diff(store: &Store, config: &EngineConfig, name: &str, size: usize) -> Result<Vec<u8>> {
    if name == "." {
        trace!("layer_diff: probe request (size={size})");
        let probe: u64 = if config.swap_layers_on_commit { u64::MAX } else { 0 };
        return Ok(probe.to_le_bytes().to_vec());
    }

    if store.is_restarted() {
        return Err(DiffError::LayerUnavailable {
            ino: 0,
            reason: "root layer is restart-in-progress",
        });
    }

    let layer_id = store
        .resolve_name(name)
        .ok_or_else(|| DiffError::InvalidLayer { name: name.to_string() })?;
    let child_lock = store
        .layer(layer_id)
        .ok_or_else(|| DiffError::InvalidLayer { name: name.to_string() })?;

    debug!("layer_diff({name}): acquiring child layer write lock");
    let mut child = child_lock.write().expect("child layer lock poisoned");

    if child.removed {
        return Err(DiffError::LayerUnavailable {
            ino: layer_id,
            reason: "layer has been removed",
        });
    }
    let parent_id = child.parent_id.ok_or(DiffError::LayerUnavailable {
        ino: layer_id,
        reason: "layer has no parent",
    })?;

    if config.swap_layers_on_commit {
        debug!("layer_diff({name}): swap-on-commit active, replying with fs_size");
        return Ok(child.fs_size.to_le_bytes().to_vec());
    }

    if child.changes.is_empty() {
        let parent_lock = store.layer(parent_id).ok_or(DiffError::LayerUnavailable {
            ino: layer_id,
            reason: "parent layer not found",
        })?;
        trace!("layer_diff({name}): acquiring parent layer read lock");
        let parent = parent_lock.read().expect("parent layer lock poisoned");
        let last_ino = parent.superblock.last_inode;
        info!("layer_diff({name}): building full change list (last_ino={last_ino})");
        child.changes = build_full_diff(&mut child, &parent, last_ino);
        debug!(
            "layer_diff({name}): built {} directory record(s)",
            child.changes.len()
        );
    }

    let frame = reply_diff(&mut child.changes, config.block_size, child.root);

    if child.changes.is_empty() {
        child.clear_ctracked();
        info!("layer_diff({name}): diff fully drained, CTRACKED cleared");
    }

    Ok(frame)
}

/// The first-call build: root, then every directory, then every file
/// (§4.6 steps 2-4). Builds into a freestanding list and hands it back so
/// the caller can install it once complete.
fn build_full_diff(child: &mut Layer, parent: &Layer, last_ino: u64) -> ChangeList {
    let child_root = child.root;
    let mut changes = ChangeList::new();
    {
        let mut ctx = DiffContext {
            child,
            parent,
            changes: &mut changes,
            last_ino,
        };

        add_directory(&mut ctx, child_root, None, ChangeType::Modified);

        let dir_inos: Vec<u64> = ctx
            .child
            .all_inodes()
            .filter(|i| i.is_dir && !i.flags.removed && !i.flags.ctracked)
            .map(|i| i.ino)
            .collect();
        for ino in dir_inos {
            let ctype = ChangeType::for_inode(ino, last_ino);
            add_directory(&mut ctx, ino, None, ctype);
        }

        let file_inos: Vec<u64> = ctx
            .child
            .all_inodes()
            .filter(|i| !i.is_dir && !i.flags.removed && !i.flags.ctracked)
            .map(|i| i.ino)
            .collect();
        for ino in file_inos {
            add_modified_inode(&mut ctx, ino);
        }
    }
    changes
}
