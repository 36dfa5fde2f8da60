//! Layer-diff engine for a copy-on-write, layered file-system.
//!
//! Given a child layer and its immediate parent, [`driver::layer_diff`]
//! produces a compact, ordered stream of the paths that were added,
//! modified, or removed between them — streamed in fixed-size frames so a
//! transport can resume across many calls. The production inode/dirent/layer
//! storage engine, the RPC transport, and persistence are all out of scope;
//! [`store`] ships only a small in-memory stand-in so the algorithm is
//! independently testable.
//!
//! Start at [`driver::layer_diff`] for the request-level entry point, or at
//! [`comparator`] for the directory-comparison core.

pub mod change_list;
pub mod comparator;
mod context;
pub mod directory;
pub mod driver;
pub mod error;
pub mod hardlink;
pub mod path;
pub mod reply;
pub mod store;

pub use change_list::{ChangeType, ChangedDir, ChangedFile};
pub use context::DiffContext;
pub use driver::{layer_diff, EngineConfig};
pub use error::{DiffError, Result};
pub use store::{Layer, Store};
