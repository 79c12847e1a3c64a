use super::{json_pretty, spin_ok, spinner, EXIT_SUCCESS};
use console::Style;
use hangar_core::Registry;

pub fn run(registry: &Registry, json: bool) -> Result<u8, String> {
    if json {
        let report = registry.refresh();
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }

    let pb = spinner(&format!("scanning {}...", registry.root().display()));
    let report = registry.refresh();
    if report.changed {
        spin_ok(
            &pb,
            &format!(
                "{} discovered, {} removed",
                report.discovered.len(),
                report.removed.len()
            ),
        );
    } else {
        spin_ok(&pb, "up to date");
    }
    let added = Style::new().green();
    let removed = Style::new().red();
    for path in &report.discovered {
        println!("  {}", added.apply_to(format!("+ {}", path.display())));
    }
    for path in &report.removed {
        println!("  {}", removed.apply_to(format!("- {}", path.display())));
    }
    for w in &report.warnings {
        eprintln!("warning: {}: {}", w.path.display(), w.message);
    }
    Ok(EXIT_SUCCESS)
}
