use crate::layout::StoreLayout;
use crate::{fsync_dir, StoreError};
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;

/// Key under which the ordered list of bundle directory names is kept.
pub const VM_LIST_KEY: &str = "vm_list";

/// Small JSON key-value store in `.hangar/preferences.json`.
///
/// Every write rewrites the whole file atomically. A missing file reads as
/// an empty store.
pub struct PreferenceStore {
    layout: StoreLayout,
}

impl PreferenceStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    fn read_all(&self) -> Result<Map<String, Value>, StoreError> {
        let path = self.layout.preferences_file();
        if !path.exists() {
            return Ok(Map::new());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_all(&self, prefs: &Map<String, Value>) -> Result<(), StoreError> {
        let dir = self.layout.state_dir();
        fs::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(prefs)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.layout.preferences_file())
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;
        Ok(())
    }

    pub fn get_list(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self.read_all()?.remove(key) {
            None => Ok(Vec::new()),
            Some(value) => {
                serde_json::from_value(value).map_err(|_| StoreError::PreferenceType(key.to_owned()))
            }
        }
    }

    pub fn set_list(&self, key: &str, values: &[String]) -> Result<(), StoreError> {
        let mut prefs = self.read_all()?;
        prefs.insert(key.to_owned(), Value::from(values.to_vec()));
        self.write_all(&prefs)
    }
}
