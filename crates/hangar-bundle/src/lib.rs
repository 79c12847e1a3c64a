//! VM bundle format for Hangar.
//!
//! A bundle is a directory named `<name>.vm` holding a `config.toml` and an
//! `images/` subdirectory with the disk images its drives reference. This crate
//! defines the configuration schema (`VmConfig`, `Drive`), the "is a bundle"
//! predicate, and checksummed, atomic reads and writes of the configuration.

pub mod bundle;
pub mod config;

pub use bundle::{
    bundle_dir_name, images_dir, is_bundle, read_config, validate_image_name, validate_vm_name,
    write_config,
    BUNDLE_EXTENSION, CONFIG_FILE, IMAGES_DIR,
};
pub use config::{Architecture, Drive, DriveInterface, ImageType, VmConfig};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("bundle I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse bundle configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize bundle configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("not a VM bundle: {}", .0.display())]
    NotABundle(PathBuf),
    #[error("configuration checksum mismatch in {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("invalid VM name: {0}")]
    InvalidName(String),
    #[error("invalid drive image name '{0}': must be a plain file name")]
    InvalidImageName(String),
}
