use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Malformed run input. Reported before any device I/O and fatal to the run.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("stripe size must be a positive integer number of bytes, got `{0}`")]
    InvalidStripeSize(String),

    #[error(
        "sample count must be an integer between 1 and {max}, got `{0}`",
        max = crate::model::MAX_SAMPLE_COUNT
    )]
    InvalidSampleCount(String),

    #[error("threshold must be a percentage between 1 and 100, got {0}")]
    InvalidThreshold(u32),

    #[error("reference list {path} could not be read: {source}")]
    ReferenceFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no device references supplied")]
    NoReferences,
}

/// A device reference could not be turned into a readable device.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("unrecognized device reference `{0}`")]
    Unparsable(String),

    #[error("device {0} does not exist")]
    NotFound(PathBuf),

    #[error("{0} is not a block device")]
    NotBlockDevice(PathBuf),

    #[error("{0} is outside /dev; pass --allow-image-files to scan drive images")]
    ImageFilesDisabled(PathBuf),

    #[error("failed to inspect {path}: {source}")]
    Inspect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to query existing mappings for {image}: {message}")]
    MappingQuery { image: String, message: String },

    #[error("failed to attach {image}: {message}")]
    AttachFailed { image: String, message: String },
}

/// A single read against a block device failed.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("offset {offset} is beyond device end ({size} bytes)")]
    OutOfRange { offset: u64, size: u64 },

    #[error("offset overflow for stripe {stripe}")]
    OffsetOverflow { stripe: u64 },

    #[error("read of {len} bytes at offset {offset} failed: {source}")]
    Io {
        offset: u64,
        len: usize,
        #[source]
        source: io::Error,
    },
}

/// Detaching a self-attached device failed. Logged, never escalated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to detach {device_path} ({reference}): {message}")]
pub struct ReleaseWarning {
    pub reference: String,
    pub device_path: String,
    pub message: String,
}

/// A call into the remote-block attachment tooling failed.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("unexpected output from `{command}`: {message}")]
    UnexpectedOutput { command: String, message: String },
}
