use super::{json_pretty, EXIT_SUCCESS};
use hangar_core::Registry;

pub fn run(registry: &Registry, from: usize, to: usize, json: bool) -> Result<u8, String> {
    registry
        .move_machine(from, to)
        .map_err(|e| e.to_string())?;

    let names: Vec<String> = registry
        .machines()
        .iter()
        .map(|vm| vm.name().to_owned())
        .collect();
    if json {
        println!("{}", json_pretty(&names)?);
    } else {
        for (i, name) in names.iter().enumerate() {
            println!("{i:<4} {name}");
        }
    }
    Ok(EXIT_SUCCESS)
}
