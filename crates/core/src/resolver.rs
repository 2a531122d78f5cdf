use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::error::{AttachError, ReleaseWarning, ResolutionError};
use crate::reference::{DeviceReference, RemoteImage};

pub trait AttachmentLayer {
    fn find_mapping(&self, image: &RemoteImage) -> Result<Option<PathBuf>, AttachError>;

    fn attach(&self, image: &RemoteImage) -> Result<PathBuf, AttachError>;

    fn detach(&self, device: &Path) -> Result<(), AttachError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverOptions {
    pub allow_image_files: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedHandle {
    pub reference: DeviceReference,
    pub device_path: PathBuf,
    pub self_attached: bool,
}

pub struct Resolver<A> {
    layer: A,
    options: ResolverOptions,
    ledger: Mutex<Vec<ManagedHandle>>,
}

impl<A: AttachmentLayer> Resolver<A> {
    pub fn new(layer: A, options: ResolverOptions) -> Self {
        Self {
            layer,
            options,
            ledger: Mutex::new(Vec::new()),
        }
    }

    pub fn layer(&self) -> &A {
        &self.layer
    }

    pub fn resolve(&self, reference: &DeviceReference) -> Result<ManagedHandle, ResolutionError> {
        match reference {
            DeviceReference::Path { path } => {
                let device_path = self.resolve_path(path)?;
                Ok(ManagedHandle {
                    reference: reference.clone(),
                    device_path,
                    self_attached: false,
                })
            }
            DeviceReference::ImageFile { path } => {
                if !self.options.allow_image_files {
                    return Err(ResolutionError::ImageFilesDisabled(path.clone()));
                }
                let device_path = self.resolve_path(path)?;
                Ok(ManagedHandle {
                    reference: reference.clone(),
                    device_path,
                    self_attached: false,
                })
            }
            DeviceReference::RemoteImage(image) => self.resolve_remote(reference, image),
        }
    }

    pub fn acquire(&self, reference: &DeviceReference) -> Result<HandleGuard<'_, A>, ResolutionError> {
        let handle = self.resolve(reference)?;
        Ok(HandleGuard {
            resolver: self,
            handle,
            armed: true,
        })
    }

    fn resolve_path(&self, path: &Path) -> Result<PathBuf, ResolutionError> {
        let canonical = fs::canonicalize(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ResolutionError::NotFound(path.to_path_buf()),
            _ => ResolutionError::Inspect {
                path: path.to_path_buf(),
                source,
            },
        })?;
        let metadata = fs::metadata(&canonical).map_err(|source| ResolutionError::Inspect {
            path: canonical.clone(),
            source,
        })?;

        if is_block_device(&metadata) || (self.options.allow_image_files && metadata.is_file()) {
            if canonical != path {
                debug!("{} resolves to {}", path.display(), canonical.display());
            }
            Ok(canonical)
        } else {
            Err(ResolutionError::NotBlockDevice(canonical))
        }
    }

    // Check-then-attach is not atomic against the attachment table; one run at a time.
    fn resolve_remote(
        &self,
        reference: &DeviceReference,
        image: &RemoteImage,
    ) -> Result<ManagedHandle, ResolutionError> {
        let existing = self
            .layer
            .find_mapping(image)
            .map_err(|err| ResolutionError::MappingQuery {
                image: image.qualified_name(),
                message: err.to_string(),
            })?;

        match existing {
            Some(device_path) if device_path.exists() => {
                info!(
                    "{} already mapped at {}; leaving mapping in place",
                    image,
                    device_path.display()
                );
                return Ok(ManagedHandle {
                    reference: reference.clone(),
                    device_path,
                    self_attached: false,
                });
            }
            Some(stale) => warn!(
                "{} reported as mapped at {}, but the device is missing; mapping again",
                image,
                stale.display()
            ),
            None => {}
        }

        let device_path = self
            .layer
            .attach(image)
            .map_err(|err| ResolutionError::AttachFailed {
                image: image.qualified_name(),
                message: err.to_string(),
            })?;
        let handle = ManagedHandle {
            reference: reference.clone(),
            device_path,
            self_attached: true,
        };
        self.ledger().push(handle.clone());
        Ok(handle)
    }

    // Mappings found already in place are never detached.
    pub fn release(&self, handle: &ManagedHandle) -> Option<ReleaseWarning> {
        if !handle.self_attached {
            return None;
        }

        let owned = {
            let mut ledger = self.ledger();
            let position = ledger
                .iter()
                .position(|entry| entry.device_path == handle.device_path)?;
            ledger.remove(position)
        };
        self.detach(&owned)
    }

    pub fn release_outstanding(&self) -> Vec<ReleaseWarning> {
        let outstanding = std::mem::take(&mut *self.ledger());
        outstanding
            .iter()
            .filter_map(|handle| self.detach(handle))
            .collect()
    }

    pub fn outstanding(&self) -> usize {
        self.ledger().len()
    }

    fn detach(&self, handle: &ManagedHandle) -> Option<ReleaseWarning> {
        match self.layer.detach(&handle.device_path) {
            Ok(()) => None,
            Err(err) => {
                let warning = ReleaseWarning {
                    reference: handle.reference.to_string(),
                    device_path: handle.device_path.to_string_lossy().to_string(),
                    message: err.to_string(),
                };
                warn!("{warning}");
                Some(warning)
            }
        }
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, Vec<ManagedHandle>> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct HandleGuard<'r, A: AttachmentLayer> {
    resolver: &'r Resolver<A>,
    handle: ManagedHandle,
    armed: bool,
}

impl<A: AttachmentLayer> HandleGuard<'_, A> {
    pub fn handle(&self) -> &ManagedHandle {
        &self.handle
    }

    pub fn release(mut self) -> Option<ReleaseWarning> {
        self.armed = false;
        self.resolver.release(&self.handle)
    }
}

impl<A: AttachmentLayer> Drop for HandleGuard<'_, A> {
    fn drop(&mut self) {
        if self.armed {
            self.resolver.release(&self.handle);
        }
    }
}

#[cfg(unix)]
fn is_block_device(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    metadata.file_type().is_block_device()
}

#[cfg(not(unix))]
fn is_block_device(_metadata: &fs::Metadata) -> bool {
    false
}
