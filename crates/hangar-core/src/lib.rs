//! Core registry for Hangar virtual machine bundles.
//!
//! This crate owns the authoritative, ordered list of known VMs and keeps it
//! in step with the documents directory (`Registry::refresh`). It provides the
//! CRUD operations on bundles, drive creation through a blocking bridge over
//! callback-based `ImageCreator`s, and a busy-work wrapper that runs slow
//! operations on worker threads while publishing `busy` and alert state.
//! All registry state lives behind a single publishing context; observers
//! receive `RegistryEvent`s through `Registry::subscribe`.

pub mod busy;
pub mod drives;
pub mod handle;
pub mod image;
pub mod publish;
pub mod registry;

pub use drives::DriveRequest;
pub use handle::{BundleLocation, VmHandle};
pub use image::{
    select_creator, wait_for_image, Completion, ImageCreator, ImageOutcome, ImageRequest,
    QemuImgCreator, SparseImageCreator,
};
pub use publish::RegistryEvent;
pub use registry::{RefreshReport, RefreshWarning, Registry, RegistryConfig, DEFAULT_VM_NAME};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("bundle error: {0}")]
    Bundle(#[from] hangar_bundle::BundleError),
    #[error("store error: {0}")]
    Store(#[from] hangar_store::StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("VM '{0}' has not been saved yet")]
    NotSaved(String),
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("invalid drive size: {0} MiB (must be greater than zero)")]
    InvalidSize(i64),
    #[error("image creation failed: {0}")]
    ImageCreation(String),
    #[error("refusing to block the publishing context on image creation")]
    BlockingOnPublisher,
    #[error("unknown image tool '{0}'")]
    UnknownImageTool(String),
    #[error("refusing to delete {}: not an image file inside the bundle", .0.display())]
    UnsafeImage(PathBuf),
    #[error("drive index {index} out of range ({len} drives)")]
    DriveIndex { index: usize, len: usize },
    #[error("position {index} out of range ({len} VMs)")]
    MoveIndex { index: usize, len: usize },
    #[error("failed to load bundle {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: hangar_bundle::BundleError,
    },
}
