use crate::config::{is_plain_file_name, VmConfig};
use crate::{fsync_dir, BundleError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const BUNDLE_EXTENSION: &str = "vm";
pub const CONFIG_FILE: &str = "config.toml";
pub const IMAGES_DIR: &str = "images";

/// Directory name of the bundle holding a VM called `name`.
pub fn bundle_dir_name(name: &str) -> String {
    format!("{name}.{BUNDLE_EXTENSION}")
}

#[inline]
pub fn images_dir(bundle: &Path) -> PathBuf {
    bundle.join(IMAGES_DIR)
}

/// A bundle is a `.vm` directory containing a regular `config.toml`.
pub fn is_bundle(path: &Path) -> bool {
    path.is_dir()
        && path.extension().and_then(|e| e.to_str()) == Some(BUNDLE_EXTENSION)
        && path.join(CONFIG_FILE).is_file()
}

pub fn validate_vm_name(name: &str) -> Result<(), BundleError> {
    if name.trim().is_empty() || name.len() > 128 {
        return Err(BundleError::InvalidName(
            "VM name must be 1-128 characters and not blank".to_owned(),
        ));
    }
    if name.starts_with('.') {
        return Err(BundleError::InvalidName(
            "VM name must not start with '.'".to_owned(),
        ));
    }
    if name.chars().any(|c| c == '/' || c == '\\' || c == '\0') {
        return Err(BundleError::InvalidName(
            "VM name must not contain path separators".to_owned(),
        ));
    }
    Ok(())
}

pub fn validate_image_name(name: &str) -> Result<(), BundleError> {
    if is_plain_file_name(name) {
        Ok(())
    } else {
        Err(BundleError::InvalidImageName(name.to_owned()))
    }
}

fn validate_drives(config: &VmConfig) -> Result<(), BundleError> {
    config
        .drives
        .iter()
        .filter_map(|d| d.image_name.as_deref())
        .try_for_each(validate_image_name)
}

/// Read and verify the configuration of the bundle at `bundle`.
pub fn read_config(bundle: &Path) -> Result<VmConfig, BundleError> {
    if !is_bundle(bundle) {
        return Err(BundleError::NotABundle(bundle.to_path_buf()));
    }
    let path = bundle.join(CONFIG_FILE);
    let content = fs::read_to_string(&path)?;
    let config: VmConfig = toml::from_str(&content)?;

    if let Some(ref expected) = config.checksum {
        let actual = config.compute_checksum()?;
        if actual != *expected {
            return Err(BundleError::ChecksumMismatch {
                path,
                expected: expected.clone(),
                actual,
            });
        }
    }
    validate_drives(&config)?;

    Ok(config)
}

/// Atomically write `config` into the bundle directory, embedding a fresh
/// checksum. The bundle directory must already exist.
pub fn write_config(bundle: &Path, config: &VmConfig) -> Result<(), BundleError> {
    validate_vm_name(&config.name)?;
    validate_drives(config)?;

    let mut with_checksum = config.clone();
    with_checksum.checksum = Some(with_checksum.compute_checksum()?);
    let content = toml::to_string_pretty(&with_checksum)?;

    let mut tmp = NamedTempFile::new_in(bundle)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(bundle.join(CONFIG_FILE))
        .map_err(|e| BundleError::Io(e.error))?;
    fsync_dir(bundle)?;

    tracing::debug!("wrote configuration for '{}' to {}", config.name, bundle.display());
    Ok(())
}
