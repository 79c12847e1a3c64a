use crate::handle::VmHandle;
use crate::image::ImageCreator;
use crate::publish::{Publisher, RegistryEvent};
use crate::CoreError;
use hangar_bundle::{is_bundle, validate_vm_name, write_config, VmConfig, BUNDLE_EXTENSION};
use hangar_store::{
    copy_dir_all, list_children, remove_path, unique_name, PreferenceStore, StoreLayout,
    VM_LIST_KEY,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Base for generated VM names: "Virtual Machine", "Virtual Machine 2", ...
pub const DEFAULT_VM_NAME: &str = "Virtual Machine";

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Documents root whose direct children are the VM bundles.
    pub root: PathBuf,
    /// Ask the image tool for compressed images where it supports it.
    pub compress_images: bool,
}

impl RegistryConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            compress_images: false,
        }
    }
}

/// A directory that looked like a bundle but could not be used, or a listing
/// failure, recorded during [`Registry::refresh`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshWarning {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    /// Whether a new list was published.
    pub changed: bool,
    pub discovered: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub warnings: Vec<RefreshWarning>,
}

pub(crate) struct Inner {
    pub(crate) layout: StoreLayout,
    pub(crate) publisher: Publisher,
    pub(crate) creator: Box<dyn ImageCreator>,
    pub(crate) compress_images: bool,
}

/// Registry of the VM bundles under one documents root.
///
/// Cheap to clone; clones share the same publishing context. Every method may
/// be called from any thread. Operations on the same handle are not serialized
/// against each other, so callers must not issue conflicting concurrent
/// operations (e.g. delete and save) on one VM.
#[derive(Clone)]
pub struct Registry {
    pub(crate) inner: Arc<Inner>,
}

impl Registry {
    /// Open the registry, seeding the list from the persisted VM order.
    ///
    /// Names in the persisted order that no longer load are dropped. Call
    /// [`refresh`](Self::refresh) afterwards to pick up bundles added while
    /// Hangar was not running.
    pub fn open(config: RegistryConfig, creator: Box<dyn ImageCreator>) -> Result<Self, CoreError> {
        let layout = StoreLayout::new(&config.root);
        layout.initialize()?;
        let prefs = PreferenceStore::new(layout.clone());

        let order = prefs.get_list(VM_LIST_KEY).unwrap_or_else(|e| {
            warn!("ignoring unreadable VM order: {e}");
            Vec::new()
        });
        let mut machines: Vec<VmHandle> = Vec::with_capacity(order.len());
        for name in &order {
            match VmHandle::load(&layout.root().join(name)) {
                Ok(vm) if !machines.contains(&vm) => machines.push(vm),
                Ok(_) => debug!("skipping duplicate '{name}' in VM order"),
                Err(e) => debug!("omitting '{name}' from VM order: {e}"),
            }
        }

        let registry = Self {
            inner: Arc::new(Inner {
                layout,
                publisher: Publisher::new(prefs),
                creator,
                compress_images: config.compress_images,
            }),
        };
        let count = machines.len();
        registry.publisher().with_state(|s| s.replace_machines(machines));
        info!(
            "opened registry at {} with {count} VM(s)",
            registry.root().display()
        );
        Ok(registry)
    }

    #[inline]
    pub(crate) fn publisher(&self) -> &Publisher {
        &self.inner.publisher
    }

    #[inline]
    pub fn root(&self) -> &Path {
        self.inner.layout.root()
    }

    #[inline]
    pub fn layout(&self) -> &StoreLayout {
        &self.inner.layout
    }

    pub fn image_creator(&self) -> &dyn ImageCreator {
        self.inner.creator.as_ref()
    }

    pub fn subscribe(&self) -> Receiver<RegistryEvent> {
        self.publisher().subscribe()
    }

    pub fn machines(&self) -> Vec<VmHandle> {
        self.publisher().with_state(|s| s.machines.clone())
    }

    /// The listed handle at `path`, if any.
    pub fn find(&self, path: &Path) -> Option<VmHandle> {
        self.publisher()
            .with_state(|s| s.machines.iter().find(|vm| vm.path() == Some(path)).cloned())
    }

    pub fn selected(&self) -> Option<VmHandle> {
        self.publisher().with_state(|s| {
            let selected = s.selected.as_deref()?;
            s.machines.iter().find(|vm| vm.path() == Some(selected)).cloned()
        })
    }

    pub fn busy(&self) -> bool {
        self.publisher().with_state(|s| s.busy)
    }

    pub fn pending_alert(&self) -> Option<String> {
        self.publisher().with_state(|s| s.pending_alert.clone())
    }

    pub fn take_alert(&self) -> Option<String> {
        self.publisher().with_state(|s| s.pending_alert.take())
    }

    /// Whether the settings view was requested, resetting the flag.
    pub fn take_show_settings(&self) -> bool {
        self.publisher()
            .with_state(|s| std::mem::take(&mut s.show_settings))
    }

    /// Reconcile the list with the documents root.
    ///
    /// Entries whose bundle disappeared are dropped, existing entries keep
    /// their order, and newly found bundles are placed in front. Bundles that
    /// fail to load are reported in the returned warnings and skipped. The new
    /// list is only published if it differs from the current one.
    pub fn refresh(&self) -> RefreshReport {
        let mut report = RefreshReport::default();
        let current = self.machines();

        let mut result = Vec::with_capacity(current.len());
        for vm in current {
            match vm.path() {
                Some(path) if path.exists() => result.push(vm),
                Some(path) => {
                    debug!("dropping stale entry {}", path.display());
                    report.removed.push(path.to_path_buf());
                }
                None => {}
            }
        }

        match list_children(self.root()) {
            Ok(children) => {
                for child in children {
                    if result.iter().any(|vm| vm.path() == Some(child.as_path())) {
                        continue;
                    }
                    if !child.is_dir() || !is_bundle(&child) {
                        continue;
                    }
                    match VmHandle::load(&child) {
                        Ok(vm) => {
                            debug!("discovered {}", child.display());
                            report.discovered.push(child);
                            result.insert(0, vm);
                        }
                        Err(e) => {
                            warn!("skipping {}: {e}", child.display());
                            report.warnings.push(RefreshWarning {
                                path: child,
                                message: e.to_string(),
                            });
                        }
                    }
                }
            }
            Err(e) => {
                warn!("failed to list {}: {e}", self.root().display());
                report.warnings.push(RefreshWarning {
                    path: self.root().to_path_buf(),
                    message: e.to_string(),
                });
            }
        }

        report.changed = self.publisher().with_state(|s| s.replace_machines(result));
        report
    }

    /// A free default name for a new VM.
    pub fn default_name(&self) -> String {
        self.unique_vm_name(DEFAULT_VM_NAME)
    }

    pub fn unique_vm_name(&self, base: &str) -> String {
        unique_name(self.root(), base, Some(BUNDLE_EXTENSION))
    }

    /// Save a new VM under the documents root and append it to the list.
    pub fn create(&self, config: VmConfig) -> Result<VmHandle, CoreError> {
        let mut vm = VmHandle::unsaved(config, self.root());
        vm.save()?;
        info!("created VM '{}' at {}", vm.name(), vm.bundle_path().display());
        self.publisher().with_state(|s| s.push_machine(vm.clone()));
        Ok(vm)
    }

    /// Persist `vm`. On failure the listed entry is reloaded from disk (or
    /// dropped if that fails too) before the error is returned, so the list
    /// never holds a configuration that was not written.
    pub fn save(&self, vm: &mut VmHandle) -> Result<(), CoreError> {
        match vm.save() {
            Ok(()) => {
                self.publisher().with_state(|s| s.update_machine(vm.clone()));
                Ok(())
            }
            Err(e) => {
                if let Some(path) = vm.path().map(Path::to_path_buf) {
                    warn!("save of {} failed, reloading: {e}", path.display());
                    match VmHandle::load(&path) {
                        Ok(fresh) => {
                            self.publisher().with_state(|s| s.update_machine(fresh));
                        }
                        Err(reload) => {
                            warn!("reload of {} failed, dropping it: {reload}", path.display());
                            self.publisher().with_state(|s| s.remove_machine(&path));
                        }
                    }
                }
                Err(e)
            }
        }
    }

    /// Delete the bundle from disk and drop it from the list.
    pub fn delete(&self, vm: &VmHandle) -> Result<(), CoreError> {
        let path = vm
            .path()
            .ok_or_else(|| CoreError::NotSaved(vm.name().to_owned()))?;
        remove_path(path)?;
        info!("deleted VM '{}' at {}", vm.name(), path.display());
        self.publisher().with_state(|s| s.remove_machine(path));
        Ok(())
    }

    /// Copy the bundle to a freshly named sibling and append the copy.
    pub fn clone_vm(&self, vm: &VmHandle) -> Result<VmHandle, CoreError> {
        let src = vm
            .path()
            .ok_or_else(|| CoreError::NotSaved(vm.name().to_owned()))?;
        if !src.exists() {
            return Err(CoreError::NotFound(src.to_path_buf()));
        }

        let name = self.unique_vm_name(&vm.config().name);
        validate_vm_name(&name)?;
        let dst = self.inner.layout.bundle_path(&name);
        copy_dir_all(src, &dst)?;

        let copy = match rename_copy(&dst, &name) {
            Ok(copy) => copy,
            Err(e) => {
                if let Err(cleanup) = remove_path(&dst) {
                    warn!("failed to remove unusable clone {}: {cleanup}", dst.display());
                }
                return Err(e);
            }
        };

        info!("cloned '{}' to '{name}'", vm.name());
        self.publisher().with_state(|s| s.push_machine(copy.clone()));
        Ok(copy)
    }

    /// Reorder the list in memory; the bundle on disk is untouched.
    pub fn move_machine(&self, from: usize, to: usize) -> Result<(), CoreError> {
        self.publisher()
            .with_state(|s| s.move_machine(from, to))
            .map_err(|len| CoreError::MoveIndex { index: from, len })
    }

    pub fn select(&self, vm: Option<&VmHandle>) -> Result<(), CoreError> {
        let path = match vm {
            None => None,
            Some(vm) => Some(self.listed_path(vm)?),
        };
        self.publisher().with_state(|s| s.set_selected(path));
        Ok(())
    }

    /// Select `vm` and ask the UI to show its settings.
    pub fn edit(&self, vm: &VmHandle) -> Result<(), CoreError> {
        let path = self.listed_path(vm)?;
        self.publisher().with_state(|s| {
            s.set_selected(Some(path.clone()));
            s.raise_show_settings(path);
        });
        Ok(())
    }

    fn listed_path(&self, vm: &VmHandle) -> Result<PathBuf, CoreError> {
        let path = vm
            .path()
            .ok_or_else(|| CoreError::NotSaved(vm.name().to_owned()))?;
        if self.find(path).is_none() {
            return Err(CoreError::NotFound(path.to_path_buf()));
        }
        Ok(path.to_path_buf())
    }
}

/// Load a freshly copied bundle and give it `name` and new timestamps.
fn rename_copy(dst: &Path, name: &str) -> Result<VmHandle, CoreError> {
    let mut copy = VmHandle::load(dst)?;
    let now = chrono::Utc::now().to_rfc3339();
    let config = copy.config_mut();
    config.name = name.to_owned();
    config.created_at.clone_from(&now);
    config.updated_at = now;
    write_config(dst, copy.config())?;
    Ok(copy)
}
