use std::env;

use serde::{Deserialize, Serialize};

use crate::rbd::{MappedImage, RbdCli};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorInfo {
    pub os: String,
    pub arch: String,
    pub current_dir: Option<String>,
    pub read_only_mode: bool,
    pub rbd_program: String,
    pub rbd_version: Option<String>,
    pub mapped_images: Vec<MappedImage>,
    pub notes: Vec<String>,
}

pub fn collect_doctor_info(rbd: &RbdCli) -> DoctorInfo {
    let current_dir = env::current_dir()
        .ok()
        .map(|path| path.to_string_lossy().to_string());

    let mut notes = vec![
        "Devices are opened read-only; remote images are mapped with --read-only.".to_string(),
        "Mappings that existed before a run are never unmapped by it.".to_string(),
    ];

    let rbd_version = match rbd.version() {
        Ok(version) => Some(version),
        Err(err) => {
            notes.push(format!(
                "`{}` is unavailable ({err}); only local device paths can be scanned. Install ceph-common for rbd support.",
                rbd.program()
            ));
            None
        }
    };

    let mapped_images = if rbd_version.is_some() {
        match rbd.showmapped() {
            Ok(mapped) => mapped,
            Err(err) => {
                notes.push(format!("Could not list mapped images: {err}"));
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    notes.extend(privilege_note(effective_root()));

    DoctorInfo {
        os: env::consts::OS.to_string(),
        arch: env::consts::ARCH.to_string(),
        current_dir,
        read_only_mode: true,
        rbd_program: rbd.program().to_string(),
        rbd_version,
        mapped_images,
        notes,
    }
}

fn privilege_note(root: Option<bool>) -> Option<String> {
    match root {
        Some(true) => None,
        Some(false) => Some(
            "Not running as root; raw block devices are usually unreadable without it."
                .to_string(),
        ),
        None => Some(
            "Could not tell whether this process runs as root; raw block devices usually need it."
                .to_string(),
        ),
    }
}

// Best effort: the process's own procfs entry is owned by its effective uid.
#[cfg(target_os = "linux")]
fn effective_root() -> Option<bool> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata("/proc/self")
        .ok()
        .map(|metadata| metadata.uid() == 0)
}

#[cfg(not(target_os = "linux"))]
fn effective_root() -> Option<bool> {
    None
}
