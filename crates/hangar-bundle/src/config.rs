use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    #[default]
    X86_64,
    Aarch64,
    Riscv64,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::Aarch64 => write!(f, "aarch64"),
            Architecture::Riscv64 => write!(f, "riscv64"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    #[default]
    Disk,
    Cd,
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageType::Disk => write!(f, "disk"),
            ImageType::Cd => write!(f, "cd"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DriveInterface {
    Virtio,
    Ide,
    Scsi,
    Nvme,
    Usb,
    Sd,
}

impl DriveInterface {
    /// Interface used when a drive request does not name one.
    pub fn default_for(removable: bool) -> Self {
        if removable {
            DriveInterface::Usb
        } else {
            DriveInterface::Virtio
        }
    }
}

impl fmt::Display for DriveInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriveInterface::Virtio => "virtio",
            DriveInterface::Ide => "ide",
            DriveInterface::Scsi => "scsi",
            DriveInterface::Nvme => "nvme",
            DriveInterface::Usb => "usb",
            DriveInterface::Sd => "sd",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for DriveInterface {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "virtio" => Ok(DriveInterface::Virtio),
            "ide" => Ok(DriveInterface::Ide),
            "scsi" => Ok(DriveInterface::Scsi),
            "nvme" => Ok(DriveInterface::Nvme),
            "usb" => Ok(DriveInterface::Usb),
            "sd" => Ok(DriveInterface::Sd),
            other => Err(format!(
                "unknown drive interface '{other}' (expected: virtio, ide, scsi, nvme, usb, sd)"
            )),
        }
    }
}

/// One drive attached to a VM. Removable drives have no backing image until
/// the user inserts media, so `image_name` is optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Drive {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    #[serde(default)]
    pub image_type: ImageType,
    pub interface: DriveInterface,
    #[serde(default)]
    pub removable: bool,
}

/// Whether `name` names a file directly inside a directory: one normal path
/// component, no separators, not `.` or `..`.
pub(crate) fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.chars().any(|c| c == '/' || c == '\\' || c == '\0')
}

impl Drive {
    /// Path of the backing image inside `images_dir`, if the drive has one.
    /// `None` as well when `image_name` is not a plain file name, so the
    /// result never points outside `images_dir`.
    pub fn image_path(&self, images_dir: &Path) -> Option<PathBuf> {
        self.image_name
            .as_deref()
            .filter(|n| is_plain_file_name(n))
            .map(|n| images_dir.join(n))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VmConfig {
    pub name: String,
    #[serde(default)]
    pub architecture: Architecture,
    #[serde(default = "default_cpu_count")]
    pub cpu_count: u32,
    #[serde(default = "default_memory_mib")]
    pub memory_mib: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    /// blake3 checksum over the rest of the configuration. `None` for
    /// hand-written configurations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, rename = "drive")]
    pub drives: Vec<Drive>,
}

fn default_cpu_count() -> u32 {
    2
}

fn default_memory_mib() -> u64 {
    2048
}

impl VmConfig {
    pub fn new(name: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            name: name.into(),
            architecture: Architecture::default(),
            cpu_count: default_cpu_count(),
            memory_mib: default_memory_mib(),
            notes: None,
            created_at: now.clone(),
            updated_at: now,
            checksum: None,
            drives: Vec::new(),
        }
    }

    /// Compute the checksum over the configuration content, excluding the
    /// checksum field itself.
    pub(crate) fn compute_checksum(&self) -> Result<String, toml::ser::Error> {
        let mut copy = self.clone();
        copy.checksum = None;
        let text = toml::to_string(&copy)?;
        Ok(blake3::hash(text.as_bytes()).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_path_stays_inside_images_dir() {
        let images = Path::new("/vms/A.vm/images");
        let drive = |name: &str| Drive {
            image_name: Some(name.to_owned()),
            image_type: ImageType::Disk,
            interface: DriveInterface::Virtio,
            removable: false,
        };
        assert_eq!(
            drive("disk.img").image_path(images),
            Some(images.join("disk.img"))
        );
        assert_eq!(drive("/home/user").image_path(images), None);
        assert_eq!(drive("../../etc").image_path(images), None);
        assert_eq!(drive("..").image_path(images), None);
    }

    #[test]
    fn parses_full_config() {
        let input = r#"
name = "Debian"
architecture = "aarch64"
cpu_count = 4
memory_mib = 8192
notes = "build box"

[[drive]]
image_name = "disk.qcow2"
image_type = "disk"
interface = "virtio"

[[drive]]
image_type = "cd"
interface = "usb"
removable = true
"#;
        let config: VmConfig = toml::from_str(input).expect("should parse");
        assert_eq!(config.name, "Debian");
        assert_eq!(config.architecture, Architecture::Aarch64);
        assert_eq!(config.cpu_count, 4);
        assert_eq!(config.drives.len(), 2);
        assert!(config.drives[1].removable);
        assert_eq!(config.drives[1].image_name, None);
    }

    #[test]
    fn parses_minimal_config() {
        let config: VmConfig = toml::from_str("name = \"Tiny\"\n").expect("should parse");
        assert_eq!(config.cpu_count, 2);
        assert_eq!(config.memory_mib, 2048);
        assert!(config.drives.is_empty());
        assert_eq!(config.architecture, Architecture::X86_64);
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(toml::from_str::<VmConfig>("name = \"x\"\nbogus = 1\n").is_err());
    }

    #[test]
    fn checksum_ignores_checksum_field() {
        let mut config = VmConfig::new("Sum");
        let a = config.compute_checksum().unwrap();
        config.checksum = Some("anything".to_owned());
        let b = config.compute_checksum().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_changes_with_content() {
        let mut config = VmConfig::new("Sum");
        let a = config.compute_checksum().unwrap();
        config.cpu_count = 8;
        assert_ne!(a, config.compute_checksum().unwrap());
    }

    #[test]
    fn drive_image_path_joins_images_dir() {
        let drive = Drive {
            image_name: Some("disk.qcow2".to_owned()),
            image_type: ImageType::Disk,
            interface: DriveInterface::Virtio,
            removable: false,
        };
        assert_eq!(
            drive.image_path(Path::new("/vms/A.vm/images")),
            Some(PathBuf::from("/vms/A.vm/images/disk.qcow2"))
        );
    }

    #[test]
    fn interface_defaults_and_parsing() {
        assert_eq!(DriveInterface::default_for(true), DriveInterface::Usb);
        assert_eq!(DriveInterface::default_for(false), DriveInterface::Virtio);
        assert_eq!("nvme".parse::<DriveInterface>(), Ok(DriveInterface::Nvme));
        assert!("floppy".parse::<DriveInterface>().is_err());
    }
}
