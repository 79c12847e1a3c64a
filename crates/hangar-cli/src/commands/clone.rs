use super::{json_pretty, resolve_vm, run_busy, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use hangar_core::Registry;
use std::sync::mpsc;

pub fn run(registry: &Registry, input: &str, json: bool) -> Result<u8, String> {
    let vm = resolve_vm(registry, input)?;
    let source = vm.clone();

    let pb = (!json).then(|| spinner(&format!("cloning '{}'...", vm.name())));
    let (tx, rx) = mpsc::channel();
    let result = run_busy(registry, move |r| {
        let copy = r.clone_vm(&source)?;
        let _ = tx.send(copy);
        Ok(())
    });
    let copy = match result.and_then(|()| rx.recv().map_err(|e| e.to_string())) {
        Ok(copy) => copy,
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, "clone failed");
            }
            return Err(e);
        }
    };

    if let Some(pb) = &pb {
        spin_ok(pb, &format!("cloned '{}' to '{}'", vm.name(), copy.name()));
    } else {
        let msg = serde_json::json!({
            "source": vm.path(),
            "name": copy.name(),
            "path": copy.path(),
        });
        println!("{}", json_pretty(&msg)?);
    }
    Ok(EXIT_SUCCESS)
}
