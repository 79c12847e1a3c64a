mod commands;

use clap::{Parser, Subcommand};
use commands::{EXIT_FAILURE, EXIT_REGISTRY_ERROR};
use hangar_core::{select_creator, Registry, RegistryConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

#[derive(Debug, Parser)]
#[allow(clippy::struct_excessive_bools)]
#[command(
    name = "hangar",
    version,
    about = "Registry and lifecycle manager for virtual machine bundles"
)]
struct Cli {
    /// Directory holding the VM bundles.
    #[arg(long, env = "HANGAR_ROOT", default_value = "~/VMs", global = true)]
    root: String,

    /// Tool used to create disk images (sparse, qemu-img).
    #[arg(long, default_value = "sparse", global = true)]
    image_tool: String,

    /// Request compressed disk images where the tool supports it.
    #[arg(long, default_value_t = false, global = true)]
    compress: bool,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List known VMs in their saved order.
    List,
    /// Rescan the VM directory and report what changed.
    Refresh,
    /// Print the next free default VM name.
    DefaultName,
    /// Create a new VM bundle.
    Create {
        /// VM name. Defaults to the next free "Virtual Machine N".
        name: Option<String>,
        #[arg(long)]
        cpus: Option<u32>,
        /// Memory in MiB.
        #[arg(long)]
        memory: Option<u64>,
    },
    /// Copy a VM bundle under a fresh name.
    Clone {
        /// VM name, bundle name, or list index.
        vm: String,
    },
    /// Delete a VM bundle and its disk images.
    Delete {
        vm: String,
        /// Do not ask for confirmation.
        #[arg(long, short = 'y', default_value_t = false)]
        yes: bool,
    },
    /// Move a VM to another position in the list.
    Move {
        /// Current list index.
        from: usize,
        /// New list index.
        to: usize,
    },
    /// Show a VM's settings, optionally changing them.
    Edit {
        vm: String,
        #[arg(long)]
        cpus: Option<u32>,
        /// Memory in MiB.
        #[arg(long)]
        memory: Option<u64>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Create a drive and attach it to a VM.
    AddDrive {
        vm: String,
        /// Size in MiB (ignored for removable drives).
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        size: i64,
        #[arg(long, default_value_t = false)]
        removable: bool,
        /// Attach as a CD drive instead of a disk.
        #[arg(long, default_value_t = false)]
        cd: bool,
        /// Drive interface (virtio, ide, scsi, nvme, usb, sd).
        #[arg(long)]
        interface: Option<String>,
    },
    /// Detach a drive and delete its image.
    RemoveDrive {
        vm: String,
        /// Drive index as shown by `edit`.
        index: usize,
    },
    /// Import an existing image file as a CD drive.
    ImportDrive {
        vm: String,
        file: PathBuf,
        /// Move the file instead of copying it.
        #[arg(long = "move", default_value_t = false)]
        move_file: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("HANGAR_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let registry = match open_registry(&cli) {
        Ok(r) => r,
        Err(msg) => {
            eprintln!("error: {msg}");
            return ExitCode::from(EXIT_REGISTRY_ERROR);
        }
    };
    let json = cli.json;

    // Every command sees the directory as it is now, except `refresh`, which
    // reports the reconciliation itself.
    if !matches!(cli.command, Commands::Refresh) {
        let report = registry.refresh();
        for w in &report.warnings {
            eprintln!("warning: {}: {}", w.path.display(), w.message);
        }
    }

    let result = match cli.command {
        Commands::List => commands::list::run(&registry, json),
        Commands::Refresh => commands::refresh::run(&registry, json),
        Commands::DefaultName => commands::create::default_name(&registry, json),
        Commands::Create { name, cpus, memory } => {
            commands::create::run(&registry, name, cpus, memory, json)
        }
        Commands::Clone { vm } => commands::clone::run(&registry, &vm, json),
        Commands::Delete { vm, yes } => commands::delete::run(&registry, &vm, yes, json),
        Commands::Move { from, to } => commands::reorder::run(&registry, from, to, json),
        Commands::Edit {
            vm,
            cpus,
            memory,
            notes,
        } => commands::edit::run(&registry, &vm, cpus, memory, notes, json),
        Commands::AddDrive {
            vm,
            size,
            removable,
            cd,
            interface,
        } => commands::drive::add(
            &registry,
            &vm,
            size,
            removable,
            cd,
            interface.as_deref(),
            json,
        ),
        Commands::RemoveDrive { vm, index } => commands::drive::remove(&registry, &vm, index, json),
        Commands::ImportDrive {
            vm,
            file,
            move_file,
        } => commands::drive::import(&registry, &vm, &file, !move_file, json),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn open_registry(cli: &Cli) -> Result<Registry, String> {
    let creator = select_creator(&cli.image_tool).map_err(|e| e.to_string())?;
    let config = RegistryConfig {
        root: expand_tilde(&cli.root),
        compress_images: cli.compress,
    };
    debug!(
        "root {} with image tool {}",
        config.root.display(),
        creator.name()
    );
    Registry::open(config, creator).map_err(|e| e.to_string())
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
