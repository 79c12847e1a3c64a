use super::{json_pretty, resolve_vm, run_busy, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use hangar_bundle::{DriveInterface, ImageType};
use hangar_core::{DriveRequest, Registry};
use std::path::{Path, PathBuf};

pub fn add(
    registry: &Registry,
    input: &str,
    size_mib: i64,
    removable: bool,
    cd: bool,
    interface: Option<&str>,
    json: bool,
) -> Result<u8, String> {
    let vm = resolve_vm(registry, input)?;
    let interface = interface
        .map(str::parse::<DriveInterface>)
        .transpose()?;
    let image_type = if cd { ImageType::Cd } else { ImageType::Disk };
    let request = DriveRequest {
        removable,
        size_mib,
        image_type,
        interface,
    };
    let path = saved_path(&vm)?;

    let pb = (!json).then(|| spinner(&format!("adding drive to '{}'...", vm.name())));
    let result = run_busy(registry, move |r| {
        let mut vm = vm;
        r.create_drive(&request, &mut vm)?;
        r.save(&mut vm)
    });
    finish(registry, &path, pb.as_ref(), result, "drive added", json)
}

pub fn remove(registry: &Registry, input: &str, index: usize, json: bool) -> Result<u8, String> {
    let mut vm = resolve_vm(registry, input)?;
    // The image goes only once the configuration no longer references it.
    let drive = registry
        .detach_drive(index, &mut vm)
        .map_err(|e| e.to_string())?;
    registry.save(&mut vm).map_err(|e| e.to_string())?;
    registry
        .delete_drive_image(&drive, &vm.images_dir())
        .map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&drive)?);
    } else {
        let image = drive.image_name.as_deref().unwrap_or("(empty)");
        println!("removed drive [{index}] {image} from '{}'", vm.name());
    }
    Ok(EXIT_SUCCESS)
}

pub fn import(
    registry: &Registry,
    input: &str,
    file: &Path,
    copy: bool,
    json: bool,
) -> Result<u8, String> {
    let vm = resolve_vm(registry, input)?;
    let path = saved_path(&vm)?;
    let source = file.to_path_buf();

    let verb = if copy { "copying" } else { "moving" };
    let pb = (!json).then(|| spinner(&format!("{verb} {}...", file.display())));
    let result = run_busy(registry, move |r| {
        let mut vm = vm;
        r.import_drive(&source, &mut vm, copy)?;
        r.save(&mut vm)
    });
    finish(registry, &path, pb.as_ref(), result, "image imported", json)
}

fn saved_path(vm: &hangar_core::VmHandle) -> Result<PathBuf, String> {
    vm.path()
        .map(Path::to_path_buf)
        .ok_or_else(|| format!("VM '{}' has not been saved yet", vm.name()))
}

fn finish(
    registry: &Registry,
    path: &Path,
    pb: Option<&indicatif::ProgressBar>,
    result: Result<(), String>,
    done: &str,
    json: bool,
) -> Result<u8, String> {
    if let Err(e) = result {
        if let Some(pb) = pb {
            spin_fail(pb, "drive operation failed");
        }
        return Err(e);
    }

    let vm = registry
        .find(path)
        .ok_or_else(|| format!("{} is no longer listed", path.display()))?;
    if let Some(pb) = pb {
        spin_ok(pb, done);
    }
    if json {
        println!("{}", json_pretty(&vm.config().drives)?);
    } else if let Some(d) = vm.config().drives.last() {
        let image = d.image_name.as_deref().unwrap_or("(empty)");
        println!(
            "  [{}] {} {} {image}",
            vm.config().drives.len() - 1,
            d.image_type,
            d.interface
        );
    }
    Ok(EXIT_SUCCESS)
}
