use super::{format_mib, json_pretty, resolve_vm, EXIT_SUCCESS};
use hangar_core::{Registry, VmHandle};

pub fn run(
    registry: &Registry,
    input: &str,
    cpus: Option<u32>,
    memory: Option<u64>,
    notes: Option<String>,
    json: bool,
) -> Result<u8, String> {
    let mut vm = resolve_vm(registry, input)?;

    let changed = cpus.is_some() || memory.is_some() || notes.is_some();
    if changed {
        let config = vm.config_mut();
        if let Some(cpus) = cpus {
            config.cpu_count = cpus;
        }
        if let Some(memory) = memory {
            config.memory_mib = memory;
        }
        if let Some(notes) = notes {
            config.notes = (!notes.is_empty()).then_some(notes);
        }
        registry.save(&mut vm).map_err(|e| e.to_string())?;
    }

    registry.edit(&vm).map_err(|e| e.to_string())?;
    if registry.take_show_settings() {
        print_settings(&vm, json)?;
    }
    Ok(EXIT_SUCCESS)
}

fn print_settings(vm: &VmHandle, json: bool) -> Result<(), String> {
    let config = vm.config();
    if json {
        println!("{}", json_pretty(config)?);
        return Ok(());
    }

    println!("name:         {}", config.name);
    if let Some(path) = vm.path() {
        println!("path:         {}", path.display());
    }
    println!("architecture: {}", config.architecture);
    println!("cpus:         {}", config.cpu_count);
    println!("memory:       {}", format_mib(config.memory_mib));
    if let Some(notes) = &config.notes {
        println!("notes:        {notes}");
    }
    if config.drives.is_empty() {
        println!("drives:       none");
    } else {
        println!("drives:");
        for (i, d) in config.drives.iter().enumerate() {
            let image = d.image_name.as_deref().unwrap_or("(empty)");
            let removable = if d.removable { " removable" } else { "" };
            println!("  [{i}] {} {}{removable} {image}", d.image_type, d.interface);
        }
    }
    Ok(())
}
