use crate::publish::on_publishing_context;
use crate::CoreError;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Command;
use std::sync::mpsc;
use std::thread;
use tracing::{debug, info};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub path: PathBuf,
    pub size_mib: u64,
    pub compress: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOutcome {
    pub success: bool,
    pub message: String,
}

impl ImageOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Completion callback handed to an [`ImageCreator`]. Being `FnOnce`, it can
/// report at most one outcome.
pub type Completion = Box<dyn FnOnce(ImageOutcome) + Send + 'static>;

/// External disk-image tool.
///
/// `create` may finish synchronously or hand the work to another thread; it
/// reports through `on_complete` either way. Dropping `on_complete` without
/// calling it is treated as a failure by [`wait_for_image`].
pub trait ImageCreator: Send + Sync {
    fn name(&self) -> &str;

    /// File extension of the images this tool produces.
    fn extension(&self) -> &str;

    fn create(&self, request: ImageRequest, on_complete: Completion);
}

/// Raw sparse images written in-process on a helper thread.
#[derive(Debug, Default)]
pub struct SparseImageCreator;

impl ImageCreator for SparseImageCreator {
    fn name(&self) -> &'static str {
        "sparse"
    }

    fn extension(&self) -> &'static str {
        "img"
    }

    fn create(&self, request: ImageRequest, on_complete: Completion) {
        thread::spawn(move || {
            let result = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&request.path)
                .and_then(|f| f.set_len(request.size_mib.saturating_mul(MIB)));
            let outcome = match result {
                Ok(()) => ImageOutcome::ok(format!(
                    "created {} MiB raw image {}",
                    request.size_mib,
                    request.path.display()
                )),
                Err(e) => ImageOutcome::failed(format!("{}: {e}", request.path.display())),
            };
            on_complete(outcome);
        });
    }
}

/// qcow2 images created by running `qemu-img`.
#[derive(Debug)]
pub struct QemuImgCreator {
    program: PathBuf,
}

impl Default for QemuImgCreator {
    fn default() -> Self {
        Self::new("qemu-img")
    }
}

impl QemuImgCreator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, request: &ImageRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("create").arg("-q").arg("-f").arg("qcow2");
        if request.compress {
            cmd.arg("-o").arg("compression_type=zlib");
        }
        cmd.arg(&request.path).arg(format!("{}M", request.size_mib));
        cmd
    }
}

impl ImageCreator for QemuImgCreator {
    fn name(&self) -> &'static str {
        "qemu-img"
    }

    fn extension(&self) -> &'static str {
        "qcow2"
    }

    fn create(&self, request: ImageRequest, on_complete: Completion) {
        let mut cmd = self.command(&request);
        thread::spawn(move || {
            debug!("running {cmd:?}");
            let outcome = match cmd.output() {
                Ok(out) if out.status.success() => {
                    ImageOutcome::ok(format!("created {}", request.path.display()))
                }
                Ok(out) => {
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    ImageOutcome::failed(format!(
                        "qemu-img exited with {}: {}",
                        out.status,
                        stderr.trim()
                    ))
                }
                Err(e) => ImageOutcome::failed(format!("failed to run qemu-img: {e}")),
            };
            on_complete(outcome);
        });
    }
}

pub fn select_creator(name: &str) -> Result<Box<dyn ImageCreator>, CoreError> {
    match name {
        "sparse" => Ok(Box::new(SparseImageCreator)),
        "qemu-img" => Ok(Box::new(QemuImgCreator::default())),
        other => Err(CoreError::UnknownImageTool(other.to_owned())),
    }
}

/// Block the current worker until `creator` reports on `request`.
///
/// Waits on a single-use channel that the completion callback fills exactly
/// once. There is no timeout: a tool that never answers and never drops its
/// callback blocks this thread for good. Must not be called on the publishing
/// context.
pub fn wait_for_image(creator: &dyn ImageCreator, request: ImageRequest) -> Result<(), CoreError> {
    if on_publishing_context() {
        return Err(CoreError::BlockingOnPublisher);
    }

    let (tx, rx) = mpsc::sync_channel::<ImageOutcome>(1);
    info!(
        "creating {} MiB image {} with {}",
        request.size_mib,
        request.path.display(),
        creator.name()
    );
    creator.create(
        request,
        Box::new(move |outcome| {
            // The receiver only goes away if the waiting thread died.
            let _ = tx.send(outcome);
        }),
    );

    match rx.recv() {
        Ok(outcome) if outcome.success => {
            debug!("{}", outcome.message);
            Ok(())
        }
        Ok(outcome) => Err(CoreError::ImageCreation(outcome.message)),
        Err(_) => Err(CoreError::ImageCreation(format!(
            "{} finished without reporting a result",
            creator.name()
        ))),
    }
}
