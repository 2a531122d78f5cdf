use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ResolutionError;

pub const REMOTE_KEYWORD: &str = "rbd";
pub const DEVICE_ROOT: &str = "/dev";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RemoteImage {
    pub pool: String,
    pub image: String,
}

impl RemoteImage {
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.pool, self.image)
    }
}

impl fmt::Display for RemoteImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pool, self.image)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DeviceReference {
    Path { path: PathBuf },
    ImageFile { path: PathBuf },
    RemoteImage(RemoteImage),
}

impl DeviceReference {
    /// Parses a device path, a bare device name (`sdg` is `/dev/sdg`), or
    /// `rbd <pool>/<image>` with a doubled separator tolerated. Other absolute
    /// or `./`-relative paths are drive images.
    pub fn parse(raw: &str) -> Result<Self, ResolutionError> {
        let trimmed = raw.trim();
        let unparsable = || ResolutionError::Unparsable(raw.to_string());

        if let Some(rest) = strip_keyword(trimmed) {
            let (pool, image) = rest.split_once('/').ok_or_else(unparsable)?;
            let image = image.trim_start_matches('/');
            if pool.is_empty() || image.is_empty() || image.contains('/') {
                return Err(unparsable());
            }
            if rest.chars().any(char::is_whitespace) {
                return Err(unparsable());
            }
            return Ok(Self::RemoteImage(RemoteImage {
                pool: pool.to_string(),
                image: image.to_string(),
            }));
        }

        if trimmed.is_empty()
            || trimmed.chars().any(char::is_whitespace)
            || trimmed.eq_ignore_ascii_case(REMOTE_KEYWORD)
        {
            return Err(unparsable());
        }

        let path = Path::new(trimmed);
        if path.starts_with(DEVICE_ROOT) {
            return Ok(Self::Path {
                path: path.to_path_buf(),
            });
        }
        if path.is_absolute() || trimmed.starts_with("./") || trimmed.starts_with("../") {
            return Ok(Self::ImageFile {
                path: path.to_path_buf(),
            });
        }
        if path
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(unparsable());
        }
        Ok(Self::Path {
            path: Path::new(DEVICE_ROOT).join(path),
        })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteImage(_))
    }
}

fn strip_keyword(value: &str) -> Option<&str> {
    let (keyword, rest) = value.split_once(char::is_whitespace)?;
    if keyword.eq_ignore_ascii_case(REMOTE_KEYWORD) {
        Some(rest.trim())
    } else {
        None
    }
}

impl fmt::Display for DeviceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path { path } | Self::ImageFile { path } => write!(f, "{}", path.display()),
            Self::RemoteImage(image) => write!(f, "{REMOTE_KEYWORD} {image}"),
        }
    }
}
