use super::{json_pretty, list::VmSummary, EXIT_SUCCESS};
use hangar_bundle::VmConfig;
use hangar_core::Registry;

pub fn run(
    registry: &Registry,
    name: Option<String>,
    cpus: Option<u32>,
    memory: Option<u64>,
    json: bool,
) -> Result<u8, String> {
    let name = name.unwrap_or_else(|| registry.default_name());
    let mut config = VmConfig::new(name);
    if let Some(cpus) = cpus {
        config.cpu_count = cpus;
    }
    if let Some(memory) = memory {
        config.memory_mib = memory;
    }

    let vm = registry.create(config).map_err(|e| e.to_string())?;
    let index = registry
        .machines()
        .iter()
        .position(|m| *m == vm)
        .unwrap_or_default();

    if json {
        println!("{}", json_pretty(&VmSummary::new(index, &vm))?);
    } else {
        println!("created '{}' at {}", vm.name(), vm.bundle_path().display());
    }
    Ok(EXIT_SUCCESS)
}

pub fn default_name(registry: &Registry, json: bool) -> Result<u8, String> {
    let name = registry.default_name();
    if json {
        println!("{}", json_pretty(&serde_json::json!({ "name": name }))?);
    } else {
        println!("{name}");
    }
    Ok(EXIT_SUCCESS)
}
