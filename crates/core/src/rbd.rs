use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AttachError;
use crate::reference::RemoteImage;
use crate::resolver::AttachmentLayer;

pub const DEFAULT_RBD_PROGRAM: &str = "rbd";

#[derive(Debug, Clone)]
pub struct RbdCli {
    program: String,
}

impl Default for RbdCli {
    fn default() -> Self {
        Self::new(DEFAULT_RBD_PROGRAM)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MappedImage {
    pub pool: String,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub snap: String,
    pub device: String,
}

impl MappedImage {
    fn is_head_of(&self, image: &RemoteImage) -> bool {
        self.pool == image.pool
            && self.namespace.is_empty()
            && self.name == image.image
            && (self.snap.is_empty() || self.snap == "-")
    }
}

// Newer releases print a list; older ones print an object keyed by map id.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ShowMapped {
    List(Vec<MappedImage>),
    Keyed(BTreeMap<String, MappedImage>),
}

pub fn parse_showmapped(output: &str) -> Result<Vec<MappedImage>, serde_json::Error> {
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(match serde_json::from_str::<ShowMapped>(output)? {
        ShowMapped::List(entries) => entries,
        ShowMapped::Keyed(entries) => entries.into_values().collect(),
    })
}

impl RbdCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn version(&self) -> Result<String, AttachError> {
        self.run(&["--version"])
    }

    pub fn showmapped(&self) -> Result<Vec<MappedImage>, AttachError> {
        let args = ["showmapped", "--format", "json"];
        let output = self.run(&args)?;
        parse_showmapped(&output).map_err(|err| AttachError::UnexpectedOutput {
            command: self.describe(&args),
            message: err.to_string(),
        })
    }

    fn run(&self, args: &[&str]) -> Result<String, AttachError> {
        debug!("running {}", self.describe(args));
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|source| AttachError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(AttachError::CommandFailed {
                command: self.describe(args),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn describe(&self, args: &[&str]) -> String {
        std::iter::once(self.program.as_str())
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl AttachmentLayer for RbdCli {
    fn find_mapping(&self, image: &RemoteImage) -> Result<Option<PathBuf>, AttachError> {
        Ok(self
            .showmapped()?
            .into_iter()
            .find(|entry| entry.is_head_of(image))
            .map(|entry| PathBuf::from(entry.device)))
    }

    fn attach(&self, image: &RemoteImage) -> Result<PathBuf, AttachError> {
        let name = image.qualified_name();
        let args = ["map", "--read-only", name.as_str()];
        let device = self.run(&args)?;
        if device.is_empty() {
            return Err(AttachError::UnexpectedOutput {
                command: self.describe(&args),
                message: "no device path printed".to_string(),
            });
        }
        info!("mapped {} at {}", name, device);
        Ok(PathBuf::from(device))
    }

    fn detach(&self, device: &Path) -> Result<(), AttachError> {
        let device = device.to_string_lossy();
        self.run(&["unmap", &*device])?;
        info!("unmapped {}", device);
        Ok(())
    }
}
