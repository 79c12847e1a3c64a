pub mod clone;
pub mod create;
pub mod delete;
pub mod drive;
pub mod edit;
pub mod list;
pub mod refresh;
pub mod reorder;

use hangar_core::{CoreError, Registry, VmHandle};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_REGISTRY_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Find a listed VM by list index, VM name, or bundle directory name.
pub fn resolve_vm(registry: &Registry, input: &str) -> Result<VmHandle, String> {
    let machines = registry.machines();

    if let Ok(index) = input.parse::<usize>() {
        if let Some(vm) = machines.get(index) {
            return Ok(vm.clone());
        }
    }

    let matches: Vec<_> = machines
        .iter()
        .filter(|vm| vm.name() == input || vm.bundle_name().as_deref() == Some(input))
        .collect();

    match matches.len() {
        0 => Err(format!("no VM matching '{input}'")),
        1 => Ok(matches[0].clone()),
        n => Err(format!(
            "ambiguous VM name '{input}': matches {n} VMs, use the list index"
        )),
    }
}

/// Run `work` through the registry's busy wrapper and wait for it. An error
/// the worker published as an alert is returned as the command's error.
pub fn run_busy<F>(registry: &Registry, work: F) -> Result<(), String>
where
    F: FnOnce(&Registry) -> Result<(), CoreError> + Send + 'static,
{
    let handle = registry.busy_work(work).map_err(|e| e.to_string())?;
    handle
        .join()
        .map_err(|_| "background operation panicked".to_owned())?;
    match registry.take_alert() {
        Some(alert) => Err(alert),
        None => Ok(()),
    }
}

pub fn format_mib(mib: u64) -> String {
    if mib >= 1024 && mib % 1024 == 0 {
        format!("{} GiB", mib / 1024)
    } else {
        format!("{mib} MiB")
    }
}
