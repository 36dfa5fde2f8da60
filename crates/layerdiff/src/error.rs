/// Errors the diff engine can return to a caller.
///
/// Only two kinds are externally visible (§7 of the spec); everything else
/// is a programming invariant and is asserted rather than propagated.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("layer {name:?} does not exist")]
    InvalidLayer { name: String },

    #[error("layer {ino} is unavailable: {reason}")]
    LayerUnavailable { ino: u64, reason: &'static str },
}

impl DiffError {
    /// The POSIX errno an embedding FUSE/virtio-fs transport would surface.
    pub fn as_errno(&self) -> i32 {
        match self {
            DiffError::InvalidLayer { .. } => libc_errno::EINVAL,
            DiffError::LayerUnavailable { .. } => libc_errno::EIO,
        }
    }
}

/// Minimal errno constants so this crate doesn't need a `libc` dependency
/// just to name two numbers.
mod libc_errno {
    pub const EINVAL: i32 = 22;
    pub const EIO: i32 = 5;
}

pub type Result<T> = std::result::Result<T, DiffError>;
