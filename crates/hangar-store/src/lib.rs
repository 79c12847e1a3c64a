//! Filesystem layer for Hangar.
//!
//! This crate provides the `StoreLayout` describing where bundles and Hangar's
//! own state live under the documents root, recursive copy/move/remove helpers
//! used for cloning, importing, and deleting, the bounded-probe unique naming
//! rule shared by VM names and disk images, and the `PreferenceStore` holding
//! the persisted VM order.

pub mod files;
pub mod layout;
pub mod naming;
pub mod preferences;

pub use files::{copy_dir_all, list_children, move_path, remove_path};
pub use layout::StoreLayout;
pub use naming::{unique_name, MAX_NAME_PROBES};
pub use preferences::{PreferenceStore, VM_LIST_KEY};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
///
/// POSIX does not guarantee rename durability without it, even though ext4
/// in `data=ordered` mode usually gets there on its own.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("preference '{0}' has an unexpected type")]
    PreferenceType(String),
}
