use super::{json_pretty, resolve_vm, EXIT_FAILURE, EXIT_SUCCESS};
use hangar_core::Registry;
use std::io::IsTerminal;

pub fn run(registry: &Registry, input: &str, yes: bool, json: bool) -> Result<u8, String> {
    let vm = resolve_vm(registry, input)?;

    if !yes {
        if !std::io::stdin().is_terminal() {
            return Err(format!(
                "refusing to delete '{}' without confirmation; pass --yes",
                vm.name()
            ));
        }
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Delete {} and all of its disk images?",
                console::style(vm.name()).bold()
            ))
            .default(false)
            .interact()
            .map_err(|e| format!("prompt failed: {e}"))?;
        if !confirmed {
            eprintln!("aborted");
            return Ok(EXIT_FAILURE);
        }
    }

    registry.delete(&vm).map_err(|e| e.to_string())?;

    if json {
        let msg = serde_json::json!({ "deleted": vm.path() });
        println!("{}", json_pretty(&msg)?);
    } else {
        println!("deleted '{}'", vm.name());
    }
    Ok(EXIT_SUCCESS)
}
