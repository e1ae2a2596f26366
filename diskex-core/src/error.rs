use std::io;
use std::process::ExitStatus;
use thiserror::Error;

/// Terminal failures of an exercise session.
///
/// A failed remount is deliberately absent: it is reported as a warning
/// through the session observer and never changes the session's result.
#[derive(Debug, Error)]
pub enum ExerciseError {
    /// The device could not be unmounted. Nothing was read and nothing needs
    /// to be remounted.
    #[error("unmount of {device} failed: {source}")]
    UnmountFailed {
        device: String,
        #[source]
        source: VolumeError,
    },

    /// The read pass stopped on an I/O error. `bytes_read` is the offset at
    /// which the failure occurred.
    #[error("read error on {device} after {bytes_read} bytes: {source}")]
    ReadFailed {
        device: String,
        bytes_read: u64,
        #[source]
        source: io::Error,
    },
}

impl ExerciseError {
    /// The number of bytes successfully read before the session failed.
    pub fn bytes_read(&self) -> u64 {
        match self {
            ExerciseError::UnmountFailed { .. } => 0,
            ExerciseError::ReadFailed { bytes_read, .. } => *bytes_read,
        }
    }
}

/// Failures of the unmount/mount collaborator.
///
/// Every variant keeps the diagnostic text of the underlying utility so that
/// it can be shown to the operator verbatim.
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("could not run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {status}: {output}")]
    Failed {
        command: String,
        status: ExitStatus,
        output: String,
    },

    #[error("{operation} of {target} failed: {message}")]
    System {
        operation: &'static str,
        target: String,
        message: String,
    },

    #[error("volume control is not supported on this platform")]
    Unsupported,
}

/// Failures of the device inventory collaborator.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("could not run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("could not parse output of `{command}`: {message}")]
    Parse { command: String, message: String },

    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Unavailable(String),

    #[error("device discovery is not supported on this platform")]
    Unsupported,
}
