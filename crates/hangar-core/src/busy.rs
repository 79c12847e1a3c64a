use crate::registry::Registry;
use crate::CoreError;
use std::thread::{self, JoinHandle};
use tracing::warn;

/// Clears the busy flag when dropped, including during a panic unwind.
struct BusyGuard {
    registry: Registry,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.registry.publisher().with_state(|s| s.set_busy(false));
    }
}

impl Registry {
    /// Run `work` on a new worker thread while `busy` is set.
    ///
    /// `busy` is raised before the worker starts and lowered when it finishes,
    /// whatever the outcome. A returned error is published as the pending
    /// alert. Overlapping calls are allowed; `busy` then only reflects that
    /// some work is running.
    pub fn busy_work<F>(&self, work: F) -> Result<JoinHandle<()>, CoreError>
    where
        F: FnOnce(&Registry) -> Result<(), CoreError> + Send + 'static,
    {
        self.publisher().with_state(|s| s.set_busy(true));
        let guard = BusyGuard {
            registry: self.clone(),
        };

        let spawned = thread::Builder::new()
            .name("hangar-worker".to_owned())
            .spawn(move || {
                let guard = guard;
                if let Err(e) = work(&guard.registry) {
                    warn!("background operation failed: {e}");
                    let message = e.to_string();
                    guard.registry.publisher().with_state(|s| s.set_alert(message));
                }
            });
        // On spawn failure the closure, and with it the guard, is dropped,
        // which lowers `busy` again.
        spawned.map_err(CoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::SparseImageCreator;
    use crate::publish::RegistryEvent;
    use crate::registry::RegistryConfig;

    fn registry(dir: &std::path::Path) -> Registry {
        Registry::open(RegistryConfig::new(dir), Box::new(SparseImageCreator)).unwrap()
    }

    fn busy_events(rx: &std::sync::mpsc::Receiver<RegistryEvent>) -> Vec<bool> {
        rx.try_iter()
            .filter_map(|e| match e {
                RegistryEvent::BusyChanged(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn busy_brackets_successful_work() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        let rx = reg.subscribe();
        reg.busy_work(|r| {
            assert!(r.busy());
            Ok(())
        })
        .unwrap()
        .join()
        .unwrap();
        assert_eq!(busy_events(&rx), vec![true, false]);
        assert!(!reg.busy());
        assert!(reg.pending_alert().is_none());
    }

    #[test]
    fn failure_sets_alert_and_still_clears_busy() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        let rx = reg.subscribe();
        reg.busy_work(|_| Err(CoreError::InvalidSize(0)))
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(busy_events(&rx), vec![true, false]);
        assert!(reg.take_alert().unwrap().contains("invalid drive size"));
        assert!(reg.take_alert().is_none());
    }

    #[test]
    fn panic_in_work_still_clears_busy() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        let handle = reg
            .busy_work(|_| panic!("worker blew up"))
            .unwrap();
        assert!(handle.join().is_err());
        assert!(!reg.busy());
    }

    #[test]
    fn last_alert_wins() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        reg.busy_work(|_| Err(CoreError::ImageCreation("first".to_owned())))
            .unwrap()
            .join()
            .unwrap();
        reg.busy_work(|_| Err(CoreError::ImageCreation("second".to_owned())))
            .unwrap()
            .join()
            .unwrap();
        assert!(reg.pending_alert().unwrap().contains("second"));
    }
}
