use super::{format_mib, json_pretty, EXIT_SUCCESS};
use hangar_core::{Registry, VmHandle};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
pub struct VmSummary {
    pub index: usize,
    pub name: String,
    pub path: Option<PathBuf>,
    pub architecture: String,
    pub cpu_count: u32,
    pub memory_mib: u64,
    pub drives: usize,
}

impl VmSummary {
    pub fn new(index: usize, vm: &VmHandle) -> Self {
        let config = vm.config();
        Self {
            index,
            name: config.name.clone(),
            path: vm.path().map(PathBuf::from),
            architecture: config.architecture.to_string(),
            cpu_count: config.cpu_count,
            memory_mib: config.memory_mib,
            drives: config.drives.len(),
        }
    }
}

pub fn run(registry: &Registry, json: bool) -> Result<u8, String> {
    let summaries: Vec<VmSummary> = registry
        .machines()
        .iter()
        .enumerate()
        .map(|(i, vm)| VmSummary::new(i, vm))
        .collect();

    if json {
        println!("{}", json_pretty(&summaries)?);
    } else if summaries.is_empty() {
        println!("no VMs in {}", registry.root().display());
    } else {
        println!(
            "{:<4} {:<28} {:<8} {:>4} {:>10} {:>6}",
            "#", "NAME", "ARCH", "CPUS", "MEMORY", "DRIVES"
        );
        for s in &summaries {
            println!(
                "{:<4} {:<28} {:<8} {:>4} {:>10} {:>6}",
                s.index,
                s.name,
                s.architecture,
                s.cpu_count,
                format_mib(s.memory_mib),
                s.drives
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
