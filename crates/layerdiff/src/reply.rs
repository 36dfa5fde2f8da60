//! Packs the change list into fixed-size response frames, resumable across
//! calls (§4.7, §6).

use crate::change_list::{ChangeList, ChangeType};

/// `PackedChange := u8 change_type, u16 name_len, byte[name_len] name`
/// (little-endian `name_len`, matching the in-memory `struct pchange` this
/// mirrors — a fixed header followed by a flexible trailing byte run).
fn pack_change(ctype: ChangeType, name: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(3 + name.len());
    buf.push(ctype.as_u8());
    buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
    buf.extend_from_slice(name.as_bytes());
    buf
}

/// Fill exactly one `block_size`-byte frame from the front of `changes`,
/// mutating it to remember how far serialization has progressed. A record
/// never crosses a frame boundary (§6); an all-zero frame signals
/// end-of-diff.
pub fn reply_diff(changes: &mut ChangeList, block_size: usize, root_ino: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(block_size);

    loop {
        let Some(head) = changes.front_mut() else {
            break;
        };

        if head.ino == root_ino {
            head.ctype = ChangeType::None;
        }

        if !head.dir_emitted && (head.ctype != ChangeType::None || !head.files.is_empty()) {
            let record = pack_change(head.ctype, &head.path);
            if buf.len() + record.len() > block_size {
                // Doesn't fit: reply with what we already have, and leave
                // the directory record pending for the next call.
                break;
            }
            buf.extend_from_slice(&record);
            head.dir_emitted = true;
        }

        while let Some(file) = head.files.first() {
            let record = pack_change(file.ctype, &file.name);
            if buf.len() + record.len() > block_size {
                // A record never straddles a frame: stop without touching it.
                return pad(buf, block_size);
            }
            buf.extend_from_slice(&record);
            head.files.remove(0);
        }

        if changes.len() == 1 {
            if buf.is_empty() {
                changes.pop_front();
            } else {
                // Keep a path-less sentinel so the *next* call immediately
                // produces an empty frame instead of silently ending here.
                changes.front_mut().expect("just checked len == 1").path.clear();
            }
            break;
        }

        changes.pop_front();
    }

    pad(buf, block_size)
}

fn pad(mut buf: Vec<u8>, block_size: usize) -> Vec<u8> {
    debug_assert!(buf.len() <= block_size, "overflowed the frame while packing");
    buf.resize(block_size, 0);
    buf
}
