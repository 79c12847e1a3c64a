use crate::StoreError;
use hangar_bundle::bundle_dir_name;
use std::fs;
use std::path::{Path, PathBuf};

const STATE_DIR: &str = ".hangar";
const PREFERENCES_FILE: &str = "preferences.json";

/// Directory layout under the Hangar documents root.
///
/// Bundles are direct children named `<name>.vm`. Hangar's own state lives in
/// a hidden `.hangar/` directory that never passes the bundle predicate.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn bundle_path(&self, name: &str) -> PathBuf {
        self.root.join(bundle_dir_name(name))
    }

    #[inline]
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    #[inline]
    pub fn preferences_file(&self) -> PathBuf {
        self.state_dir().join(PREFERENCES_FILE)
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.state_dir())?;
        Ok(())
    }
}
