//! The publishing context: the single owner of registry state.
//!
//! Every read and write of the VM list, selection, busy flag, and pending
//! alert goes through [`Publisher::with_state`], which holds one mutex for the
//! duration of the mutation and delivers the resulting events to observers
//! before releasing it. Observers therefore see each mutation whole and in
//! order. Worker threads do their I/O outside the lock and only marshal the
//! final state change onto this context.

use crate::handle::VmHandle;
use hangar_store::{PreferenceStore, VM_LIST_KEY};
use serde::Serialize;
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

thread_local! {
    static ON_PUBLISHER: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is inside [`Publisher::with_state`].
pub fn on_publishing_context() -> bool {
    ON_PUBLISHER.with(Cell::get)
}

struct PublisherMark;

impl PublisherMark {
    fn enter() -> Self {
        ON_PUBLISHER.with(|c| c.set(true));
        PublisherMark
    }
}

impl Drop for PublisherMark {
    fn drop(&mut self) {
        ON_PUBLISHER.with(|c| c.set(false));
    }
}

/// Change notifications delivered to [`crate::Registry::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "value", rename_all = "snake_case")]
pub enum RegistryEvent {
    /// The VM list changed structurally; carries the new order of bundle paths.
    MachinesChanged(Vec<PathBuf>),
    /// A listed VM's configuration was replaced in place.
    MachineUpdated(PathBuf),
    SelectionChanged(Option<PathBuf>),
    BusyChanged(bool),
    Alert(String),
    ShowSettings(PathBuf),
}

#[derive(Default)]
pub(crate) struct RegistryState {
    pub(crate) machines: Vec<VmHandle>,
    pub(crate) selected: Option<PathBuf>,
    pub(crate) busy: bool,
    pub(crate) pending_alert: Option<String>,
    pub(crate) show_settings: bool,
    outbox: Vec<RegistryEvent>,
    order_dirty: bool,
    observers: Vec<Sender<RegistryEvent>>,
}

fn same_identity(a: &[VmHandle], b: &[VmHandle]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y)
}

impl RegistryState {
    fn paths(&self) -> Vec<PathBuf> {
        self.machines
            .iter()
            .filter_map(|vm| vm.path().map(Path::to_path_buf))
            .collect()
    }

    fn contains(&self, path: &Path) -> bool {
        self.machines.iter().any(|vm| vm.path() == Some(path))
    }

    fn structure_changed(&mut self) {
        self.order_dirty = true;
        let paths = self.paths();
        self.outbox.push(RegistryEvent::MachinesChanged(paths));
        if let Some(selected) = self.selected.clone() {
            if !self.contains(&selected) {
                self.set_selected(None);
            }
        }
    }

    /// Replace the list unless it is identical (by identity, in order) to the
    /// current one. Returns whether anything was published.
    pub(crate) fn replace_machines(&mut self, machines: Vec<VmHandle>) -> bool {
        if same_identity(&self.machines, &machines) {
            return false;
        }
        self.machines = machines;
        self.structure_changed();
        true
    }

    /// Append a persisted handle. A handle whose path is already listed
    /// replaces that entry instead, so paths stay unique.
    pub(crate) fn push_machine(&mut self, vm: VmHandle) {
        if vm.path().is_some() && self.update_machine(vm.clone()) {
            return;
        }
        self.machines.push(vm);
        self.structure_changed();
    }

    /// Swap in a fresh copy of an already listed handle. Returns false when
    /// no entry has that path.
    pub(crate) fn update_machine(&mut self, vm: VmHandle) -> bool {
        let Some(slot) = self.machines.iter_mut().find(|existing| **existing == vm) else {
            return false;
        };
        *slot = vm;
        if let Some(path) = slot.path() {
            self.outbox.push(RegistryEvent::MachineUpdated(path.to_path_buf()));
        }
        true
    }

    pub(crate) fn remove_machine(&mut self, path: &Path) -> Option<VmHandle> {
        let index = self.machines.iter().position(|vm| vm.path() == Some(path))?;
        let removed = self.machines.remove(index);
        self.structure_changed();
        Some(removed)
    }

    /// Move the entry at `from` so that it ends up at index `to` (clamped to
    /// the end of the list).
    pub(crate) fn move_machine(&mut self, from: usize, to: usize) -> Result<(), usize> {
        let len = self.machines.len();
        if from >= len {
            return Err(len);
        }
        let to = to.min(len - 1);
        if from == to {
            return Ok(());
        }
        let vm = self.machines.remove(from);
        self.machines.insert(to, vm);
        self.structure_changed();
        Ok(())
    }

    pub(crate) fn set_selected(&mut self, selected: Option<PathBuf>) {
        if self.selected != selected {
            self.selected.clone_from(&selected);
            self.outbox.push(RegistryEvent::SelectionChanged(selected));
        }
    }

    pub(crate) fn set_busy(&mut self, busy: bool) {
        if self.busy != busy {
            self.busy = busy;
            self.outbox.push(RegistryEvent::BusyChanged(busy));
        }
    }

    pub(crate) fn set_alert(&mut self, message: String) {
        self.pending_alert = Some(message.clone());
        self.outbox.push(RegistryEvent::Alert(message));
    }

    pub(crate) fn raise_show_settings(&mut self, path: PathBuf) {
        self.show_settings = true;
        self.outbox.push(RegistryEvent::ShowSettings(path));
    }

    fn order_projection(&self) -> Vec<String> {
        self.machines.iter().filter_map(VmHandle::bundle_name).collect()
    }

    fn flush(&mut self, prefs: &PreferenceStore) {
        if std::mem::take(&mut self.order_dirty) {
            let order = self.order_projection();
            if let Err(e) = prefs.set_list(VM_LIST_KEY, &order) {
                warn!("failed to persist VM order: {e}");
            } else {
                debug!("persisted VM order ({} entries)", order.len());
            }
        }
        for event in self.outbox.drain(..) {
            self.observers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

pub(crate) struct Publisher {
    state: Mutex<RegistryState>,
    prefs: PreferenceStore,
}

impl Publisher {
    pub(crate) fn new(prefs: PreferenceStore) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            prefs,
        }
    }

    /// Run `f` on the publishing context, then persist the VM order if the
    /// list changed and deliver queued events.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut RegistryState) -> R) -> R {
        debug_assert!(
            !on_publishing_context(),
            "publishing context entered re-entrantly"
        );
        // A panic inside a mutation leaves the state usable: every mutation
        // keeps the list consistent before it can fail.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let _mark = PublisherMark::enter();
        let result = f(&mut state);
        state.flush(&self.prefs);
        result
    }

    pub(crate) fn subscribe(&self) -> Receiver<RegistryEvent> {
        let (tx, rx) = mpsc::channel();
        self.with_state(|s| s.observers.push(tx));
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::VmHandle;
    use hangar_bundle::VmConfig;
    use hangar_store::StoreLayout;

    fn publisher(dir: &Path) -> Publisher {
        let layout = StoreLayout::new(dir);
        layout.initialize().unwrap();
        Publisher::new(PreferenceStore::new(layout))
    }

    fn saved(dir: &Path, name: &str) -> VmHandle {
        let mut vm = VmHandle::unsaved(VmConfig::new(name), dir);
        vm.save().unwrap();
        vm
    }

    #[test]
    fn replace_with_identical_list_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = publisher(dir.path());
        let a = saved(dir.path(), "A");
        let rx = publisher.subscribe();

        assert!(publisher.with_state(|s| s.replace_machines(vec![a.clone()])));
        assert!(!publisher.with_state(|s| s.replace_machines(vec![a.clone()])));

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![RegistryEvent::MachinesChanged(vec![a.path().unwrap().to_path_buf()])]
        );
    }

    #[test]
    fn push_of_listed_path_does_not_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = publisher(dir.path());
        let a = saved(dir.path(), "A");
        publisher.with_state(|s| s.push_machine(a.clone()));
        publisher.with_state(|s| s.push_machine(a.clone()));
        assert_eq!(publisher.with_state(|s| s.machines.len()), 1);
    }

    #[test]
    fn removing_selected_clears_selection_in_same_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = publisher(dir.path());
        let a = saved(dir.path(), "A");
        let path = a.path().unwrap().to_path_buf();
        publisher.with_state(|s| {
            s.push_machine(a);
            s.set_selected(Some(path.clone()));
        });
        let rx = publisher.subscribe();
        publisher.with_state(|s| {
            s.remove_machine(&path);
        });
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                RegistryEvent::MachinesChanged(Vec::new()),
                RegistryEvent::SelectionChanged(None),
            ]
        );
    }

    #[test]
    fn move_machine_reorders_and_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = publisher(dir.path());
        let vms: Vec<_> = ["A", "B", "C"].iter().map(|n| saved(dir.path(), n)).collect();
        publisher.with_state(|s| s.replace_machines(vms));

        publisher.with_state(|s| s.move_machine(0, 99)).unwrap();
        let names: Vec<_> =
            publisher.with_state(|s| s.machines.iter().map(|vm| vm.name().to_owned()).collect());
        assert_eq!(names, vec!["B", "C", "A"]);

        assert_eq!(publisher.with_state(|s| s.move_machine(3, 0)), Err(3));
    }

    #[test]
    fn structural_changes_persist_order() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = publisher(dir.path());
        let a = saved(dir.path(), "A");
        let b = saved(dir.path(), "B");
        publisher.with_state(|s| s.replace_machines(vec![b, a]));

        let prefs = PreferenceStore::new(StoreLayout::new(dir.path()));
        assert_eq!(
            prefs.get_list(VM_LIST_KEY).unwrap(),
            vec!["B.vm".to_owned(), "A.vm".to_owned()]
        );
    }

    #[test]
    fn marker_is_set_only_inside_with_state() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = publisher(dir.path());
        assert!(!on_publishing_context());
        assert!(publisher.with_state(|_| on_publishing_context()));
        assert!(!on_publishing_context());
    }

    #[test]
    fn dropped_observers_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = publisher(dir.path());
        drop(publisher.subscribe());
        publisher.with_state(|s| s.set_busy(true));
        assert!(publisher.with_state(|s| s.observers.is_empty()));
    }
}
