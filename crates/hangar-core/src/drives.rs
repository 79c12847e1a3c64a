use crate::handle::VmHandle;
use crate::image::{wait_for_image, ImageRequest};
use crate::publish::on_publishing_context;
use crate::registry::Registry;
use crate::CoreError;
use hangar_bundle::{validate_image_name, Drive, DriveInterface, ImageType};
use hangar_store::{move_path, unique_name};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What the user asked for when adding a drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveRequest {
    pub removable: bool,
    /// Requested size. Only meaningful for non-removable drives, which
    /// require it to be positive.
    pub size_mib: i64,
    pub image_type: ImageType,
    pub interface: Option<DriveInterface>,
}

impl DriveRequest {
    pub fn disk(size_mib: i64) -> Self {
        Self {
            removable: false,
            size_mib,
            image_type: ImageType::Disk,
            interface: None,
        }
    }

    pub fn removable(image_type: ImageType) -> Self {
        Self {
            removable: true,
            size_mib: 0,
            image_type,
            interface: None,
        }
    }
}

impl Registry {
    /// Realize `request` and attach the drive to `vm`'s configuration.
    ///
    /// Non-removable drives get a new image, created through the blocking
    /// bridge, so this must run on a worker (see [`Registry::busy_work`]).
    /// The configuration is only changed once the image exists; callers save
    /// the handle afterwards.
    pub fn create_drive(&self, request: &DriveRequest, vm: &mut VmHandle) -> Result<(), CoreError> {
        let interface = request
            .interface
            .unwrap_or_else(|| DriveInterface::default_for(request.removable));

        if request.removable {
            vm.config_mut().drives.push(Drive {
                image_name: None,
                image_type: request.image_type,
                interface,
                removable: true,
            });
            return Ok(());
        }

        let size_mib = u64::try_from(request.size_mib)
            .ok()
            .filter(|&s| s > 0)
            .ok_or(CoreError::InvalidSize(request.size_mib))?;
        if on_publishing_context() {
            return Err(CoreError::BlockingOnPublisher);
        }

        let images = vm.images_dir();
        fs::create_dir_all(&images)?;
        let creator = self.image_creator();
        let ext = creator.extension();
        let image_name = format!("{}.{ext}", unique_name(&images, "disk", Some(ext)));

        wait_for_image(
            creator,
            ImageRequest {
                path: images.join(&image_name),
                size_mib,
                compress: self.inner.compress_images,
            },
        )?;

        info!("attached {size_mib} MiB drive {image_name} to '{}'", vm.name());
        vm.config_mut().drives.push(Drive {
            image_name: Some(image_name),
            image_type: request.image_type,
            interface,
            removable: false,
        });
        Ok(())
    }

    /// Delete the drive's backing image, if any, and detach it.
    pub fn remove_drive(&self, index: usize, vm: &mut VmHandle) -> Result<Drive, CoreError> {
        let drive = self.detach_drive(index, vm)?;
        if let Err(e) = self.delete_drive_image(&drive, &vm.images_dir()) {
            vm.config_mut().drives.insert(index, drive);
            return Err(e);
        }
        Ok(drive)
    }

    /// Detach the drive at `index` without touching its image, so the
    /// configuration can be saved before the image is deleted.
    pub fn detach_drive(&self, index: usize, vm: &mut VmHandle) -> Result<Drive, CoreError> {
        let len = vm.config().drives.len();
        if index >= len {
            return Err(CoreError::DriveIndex { index, len });
        }
        if let Some(name) = vm.config().drives[index].image_name.as_deref() {
            validate_image_name(name)?;
        }
        Ok(vm.config_mut().drives.remove(index))
    }

    /// Delete the backing image of a detached drive. Only a regular file (or
    /// a symlink, which is unlinked) directly inside `images_dir` is removed;
    /// a missing image is not an error.
    pub fn delete_drive_image(&self, drive: &Drive, images_dir: &Path) -> Result<(), CoreError> {
        let Some(name) = drive.image_name.as_deref() else {
            return Ok(());
        };
        let image = drive
            .image_path(images_dir)
            .ok_or_else(|| CoreError::UnsafeImage(PathBuf::from(name)))?;
        match fs::symlink_metadata(&image) {
            Ok(meta) if meta.is_file() || meta.file_type().is_symlink() => {
                fs::remove_file(&image)?;
                debug!("deleted image {}", image.display());
                Ok(())
            }
            Ok(_) => Err(CoreError::UnsafeImage(image)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Bring an existing image into `vm`'s images directory and attach it as
    /// a CD drive. With `copy` false the source file is moved.
    pub fn import_drive(&self, source: &Path, vm: &mut VmHandle, copy: bool) -> Result<(), CoreError> {
        if !source.is_file() {
            return Err(CoreError::NotFound(source.to_path_buf()));
        }
        let images = vm.images_dir();
        fs::create_dir_all(&images)?;

        let stem = source
            .file_stem()
            .map_or_else(|| "image".to_owned(), |s| s.to_string_lossy().into_owned());
        let ext = source.extension().map(|e| e.to_string_lossy().into_owned());
        let base = unique_name(&images, &stem, ext.as_deref());
        let image_name = match ext {
            Some(ext) => format!("{base}.{ext}"),
            None => base,
        };
        let dest = images.join(&image_name);

        if copy {
            fs::copy(source, &dest)?;
        } else {
            move_path(source, &dest)?;
        }
        info!(
            "imported {} into '{}' as {image_name}",
            source.display(),
            vm.name()
        );

        vm.config_mut().drives.push(Drive {
            image_name: Some(image_name),
            image_type: ImageType::Cd,
            interface: DriveInterface::default_for(true),
            removable: false,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::SparseImageCreator;
    use crate::registry::RegistryConfig;
    use hangar_bundle::VmConfig;
    use std::thread;

    fn setup() -> (tempfile::TempDir, Registry, VmHandle) {
        let dir = tempfile::tempdir().unwrap();
        let reg = Registry::open(RegistryConfig::new(dir.path()), Box::new(SparseImageCreator))
            .unwrap();
        let vm = reg.create(VmConfig::new("Drives")).unwrap();
        (dir, reg, vm)
    }

    #[test]
    fn removable_drive_needs_no_image() {
        let (_dir, reg, mut vm) = setup();
        reg.create_drive(&DriveRequest::removable(ImageType::Cd), &mut vm)
            .unwrap();
        let drive = &vm.config().drives[0];
        assert!(drive.removable);
        assert_eq!(drive.image_name, None);
        assert_eq!(drive.interface, DriveInterface::Usb);
    }

    #[test]
    fn non_positive_size_is_rejected_without_attaching() {
        let (_dir, reg, mut vm) = setup();
        for size in [0, -1, i64::MIN] {
            assert!(matches!(
                reg.create_drive(&DriveRequest::disk(size), &mut vm),
                Err(CoreError::InvalidSize(s)) if s == size
            ));
        }
        assert!(vm.config().drives.is_empty());
    }

    #[test]
    fn disk_drive_creates_uniquely_named_images() {
        let (_dir, reg, mut vm) = setup();
        reg.create_drive(&DriveRequest::disk(8), &mut vm).unwrap();
        reg.create_drive(&DriveRequest::disk(8), &mut vm).unwrap();

        let names: Vec<_> = vm
            .config()
            .drives
            .iter()
            .map(|d| d.image_name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["disk.img", "disk 2.img"]);
        assert_eq!(
            fs::metadata(vm.images_dir().join("disk.img")).unwrap().len(),
            8 * 1024 * 1024
        );
        assert_eq!(vm.config().drives[0].interface, DriveInterface::Virtio);
    }

    #[test]
    fn disk_drive_on_publishing_context_is_refused() {
        let (_dir, reg, mut vm) = setup();
        fs::remove_dir_all(vm.images_dir()).unwrap();
        let result = reg
            .publisher()
            .with_state(|_| reg.create_drive(&DriveRequest::disk(1), &mut vm));
        assert!(matches!(result, Err(CoreError::BlockingOnPublisher)));
        assert!(vm.config().drives.is_empty());
        assert!(!vm.images_dir().exists());
    }

    #[test]
    fn disk_drive_works_from_worker_thread() {
        let (_dir, reg, vm) = setup();
        let worker_reg = reg.clone();
        let vm = thread::spawn(move || {
            let mut vm = vm;
            worker_reg
                .create_drive(&DriveRequest::disk(2), &mut vm)
                .unwrap();
            vm
        })
        .join()
        .unwrap();
        assert_eq!(vm.config().drives.len(), 1);
    }

    #[test]
    fn remove_drive_deletes_backing_image() {
        let (_dir, reg, mut vm) = setup();
        reg.create_drive(&DriveRequest::disk(1), &mut vm).unwrap();
        let image = vm.images_dir().join("disk.img");
        assert!(image.exists());

        let removed = reg.remove_drive(0, &mut vm).unwrap();
        assert_eq!(removed.image_name.as_deref(), Some("disk.img"));
        assert!(!image.exists());
        assert!(vm.config().drives.is_empty());
    }

    #[test]
    fn remove_drive_tolerates_missing_image_and_checks_index() {
        let (_dir, reg, mut vm) = setup();
        reg.create_drive(&DriveRequest::removable(ImageType::Disk), &mut vm)
            .unwrap();
        reg.remove_drive(0, &mut vm).unwrap();
        assert!(matches!(
            reg.remove_drive(0, &mut vm),
            Err(CoreError::DriveIndex { index: 0, len: 0 })
        ));
    }

    fn attach(vm: &mut VmHandle, image_name: &str) {
        vm.config_mut().drives.push(Drive {
            image_name: Some(image_name.to_owned()),
            image_type: ImageType::Disk,
            interface: DriveInterface::Virtio,
            removable: false,
        });
    }

    #[test]
    fn remove_drive_refuses_image_name_outside_bundle() {
        let (_dir, reg, mut vm) = setup();
        let outside = tempfile::tempdir().unwrap();
        let victim = outside.path().join("victim");
        fs::create_dir_all(&victim).unwrap();
        fs::write(victim.join("data.txt"), "keep").unwrap();

        attach(&mut vm, victim.to_str().unwrap());
        attach(&mut vm, "../../victim");
        for index in [0, 1] {
            assert!(reg.remove_drive(index, &mut vm).is_err());
        }

        assert!(victim.join("data.txt").is_file());
        assert_eq!(vm.config().drives.len(), 2);
    }

    #[test]
    fn remove_drive_refuses_directory_image() {
        let (_dir, reg, mut vm) = setup();
        let nested = vm.images_dir().join("nested");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("keep.img"), b"x").unwrap();
        attach(&mut vm, "nested");

        assert!(matches!(
            reg.remove_drive(0, &mut vm),
            Err(CoreError::UnsafeImage(p)) if p == nested
        ));
        assert!(nested.join("keep.img").is_file());
        assert_eq!(vm.config().drives.len(), 1);
    }

    #[test]
    fn detach_leaves_image_until_deleted() {
        let (_dir, reg, mut vm) = setup();
        reg.create_drive(&DriveRequest::disk(1), &mut vm).unwrap();
        let image = vm.images_dir().join("disk.img");

        let drive = reg.detach_drive(0, &mut vm).unwrap();
        assert!(vm.config().drives.is_empty());
        assert!(image.exists());

        reg.delete_drive_image(&drive, &vm.images_dir()).unwrap();
        assert!(!image.exists());
        reg.delete_drive_image(&drive, &vm.images_dir()).unwrap();
    }

    #[test]
    fn import_copies_or_moves_as_cd() {
        let (dir, reg, mut vm) = setup();
        let iso = dir.path().join("installer.iso");
        fs::write(&iso, b"iso").unwrap();

        reg.import_drive(&iso, &mut vm, true).unwrap();
        assert!(iso.exists());
        reg.import_drive(&iso, &mut vm, false).unwrap();
        assert!(!iso.exists());

        let drives = &vm.config().drives;
        assert_eq!(drives[0].image_name.as_deref(), Some("installer.iso"));
        assert_eq!(drives[1].image_name.as_deref(), Some("installer 2.iso"));
        assert!(drives.iter().all(|d| d.image_type == ImageType::Cd));
        assert_eq!(fs::read(vm.images_dir().join("installer 2.iso")).unwrap(), b"iso");
    }

    #[test]
    fn import_of_missing_file_fails() {
        let (dir, reg, mut vm) = setup();
        assert!(matches!(
            reg.import_drive(&dir.path().join("nope.iso"), &mut vm, true),
            Err(CoreError::NotFound(_))
        ));
        assert!(vm.config().drives.is_empty());
    }
}
