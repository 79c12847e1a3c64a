use crate::CoreError;
use hangar_bundle::{bundle_dir_name, images_dir, is_bundle, read_config, write_config, VmConfig};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Where a VM's bundle lives, or will live once saved.
///
/// Identity is defined only between persisted locations: two `Persisted`
/// values are equal iff their paths are equal, and an `Unsaved` location is
/// never equal to anything, itself included.
#[derive(Debug, Clone)]
pub enum BundleLocation {
    Unsaved { destination: PathBuf },
    Persisted(PathBuf),
}

impl PartialEq for BundleLocation {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (BundleLocation::Persisted(a), BundleLocation::Persisted(b)) => a == b,
            _ => false,
        }
    }
}

/// In-memory representation of one VM bundle.
#[derive(Debug, Clone)]
pub struct VmHandle {
    location: BundleLocation,
    config: VmConfig,
}

impl PartialEq for VmHandle {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location
    }
}

impl VmHandle {
    /// Load the bundle at `path`.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let config = read_config(path).map_err(|source| CoreError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            location: BundleLocation::Persisted(path.to_path_buf()),
            config,
        })
    }

    /// A new VM that will be written under `destination` on first save.
    pub fn unsaved(config: VmConfig, destination: impl Into<PathBuf>) -> Self {
        Self {
            location: BundleLocation::Unsaved {
                destination: destination.into(),
            },
            config,
        }
    }

    #[inline]
    pub fn location(&self) -> &BundleLocation {
        &self.location
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            BundleLocation::Persisted(path) => Some(path),
            BundleLocation::Unsaved { .. } => None,
        }
    }

    pub fn is_saved(&self) -> bool {
        self.path().is_some()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[inline]
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    #[inline]
    pub fn config_mut(&mut self) -> &mut VmConfig {
        &mut self.config
    }

    /// Bundle directory: the saved path, or where the first save will put it.
    pub fn bundle_path(&self) -> PathBuf {
        match &self.location {
            BundleLocation::Persisted(path) => path.clone(),
            BundleLocation::Unsaved { destination } => {
                destination.join(bundle_dir_name(&self.config.name))
            }
        }
    }

    pub fn images_dir(&self) -> PathBuf {
        images_dir(&self.bundle_path())
    }

    /// Bundle directory name, as recorded in the persisted VM order.
    pub fn bundle_name(&self) -> Option<String> {
        self.path()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Write the configuration to disk. An unsaved handle becomes persisted
    /// at `<destination>/<name>.vm`, which must not already hold a bundle.
    pub fn save(&mut self) -> Result<(), CoreError> {
        let bundle = self.bundle_path();
        let fresh = !self.is_saved();
        if fresh && (is_bundle(&bundle) || bundle.is_file()) {
            return Err(CoreError::AlreadyExists(bundle));
        }
        let created_dir = fresh && !bundle.exists();

        fs::create_dir_all(images_dir(&bundle))?;
        self.config.updated_at = chrono::Utc::now().to_rfc3339();
        if let Err(e) = write_config(&bundle, &self.config) {
            if created_dir {
                if let Err(cleanup) = fs::remove_dir_all(&bundle) {
                    warn!("failed to remove {} after failed save: {cleanup}", bundle.display());
                }
            }
            return Err(e.into());
        }

        self.location = BundleLocation::Persisted(bundle);
        Ok(())
    }

    /// Discard in-memory changes and re-read the configuration from disk.
    pub fn reload(&mut self) -> Result<(), CoreError> {
        let path = self
            .path()
            .ok_or_else(|| CoreError::NotSaved(self.config.name.clone()))?
            .to_path_buf();
        *self = Self::load(&path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_handles_compare_by_path() {
        let a = VmHandle {
            location: BundleLocation::Persisted(PathBuf::from("/vms/A.vm")),
            config: VmConfig::new("A"),
        };
        let renamed = VmHandle {
            location: BundleLocation::Persisted(PathBuf::from("/vms/A.vm")),
            config: VmConfig::new("Renamed"),
        };
        let b = VmHandle {
            location: BundleLocation::Persisted(PathBuf::from("/vms/B.vm")),
            config: VmConfig::new("A"),
        };
        assert_eq!(a, renamed);
        assert_ne!(a, b);
    }

    #[test]
    #[allow(clippy::eq_op)]
    fn unsaved_handles_are_never_equal() {
        let a = VmHandle::unsaved(VmConfig::new("A"), "/vms");
        let b = VmHandle::unsaved(VmConfig::new("A"), "/vms");
        assert_ne!(a, b);
        assert!(a != a);
    }

    #[test]
    fn unsaved_bundle_path_uses_destination() {
        let vm = VmHandle::unsaved(VmConfig::new("Fresh"), "/vms");
        assert_eq!(vm.bundle_path(), PathBuf::from("/vms/Fresh.vm"));
        assert_eq!(vm.images_dir(), PathBuf::from("/vms/Fresh.vm/images"));
        assert!(vm.path().is_none());
        assert!(vm.bundle_name().is_none());
    }

    #[test]
    fn save_persists_and_load_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut vm = VmHandle::unsaved(VmConfig::new("Saved"), dir.path());
        vm.save().unwrap();
        let path = vm.path().unwrap().to_path_buf();
        assert_eq!(path, dir.path().join("Saved.vm"));
        assert!(path.join("images").is_dir());

        let loaded = VmHandle::load(&path).unwrap();
        assert_eq!(loaded, vm);
        assert_eq!(loaded.name(), "Saved");
        assert_eq!(loaded.bundle_name().as_deref(), Some("Saved.vm"));
    }

    #[test]
    fn save_refuses_to_overwrite_existing_bundle() {
        let dir = tempfile::tempdir().unwrap();
        VmHandle::unsaved(VmConfig::new("Twin"), dir.path())
            .save()
            .unwrap();
        let mut second = VmHandle::unsaved(VmConfig::new("Twin"), dir.path());
        assert!(matches!(second.save(), Err(CoreError::AlreadyExists(_))));
        assert!(!second.is_saved());
    }

    #[test]
    fn failed_first_save_leaves_no_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut vm = VmHandle::unsaved(VmConfig::new(".hidden"), dir.path());
        assert!(vm.save().is_err());
        assert!(!dir.path().join(".hidden.vm").exists());
    }

    #[test]
    fn reload_discards_unsaved_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut vm = VmHandle::unsaved(VmConfig::new("Reload"), dir.path());
        vm.save().unwrap();
        vm.config_mut().cpu_count = 16;
        vm.reload().unwrap();
        assert_eq!(vm.config().cpu_count, 2);
    }

    #[test]
    fn reload_of_unsaved_handle_fails() {
        let mut vm = VmHandle::unsaved(VmConfig::new("Nope"), "/vms");
        assert!(matches!(vm.reload(), Err(CoreError::NotSaved(_))));
    }

    #[test]
    fn load_of_missing_bundle_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            VmHandle::load(&dir.path().join("Missing.vm")),
            Err(CoreError::Load { .. })
        ));
    }
}
