//! The unmount/mount collaborator.
use crate::device::Device;
use crate::error::VolumeError;

/// Unmounts and remounts whole devices.
///
/// Both operations are synchronous and cover every volume on the device, not
/// a single partition. On success they return the diagnostic text of the
/// underlying utility, which front-ends show to the operator as is.
pub trait VolumeControl: Send + Sync {
    fn unmount(&self, device: &Device) -> Result<String, VolumeError>;
    fn mount(&self, device: &Device) -> Result<String, VolumeError>;
}

/// Runs an external utility and returns its trimmed stdout and stderr.
///
/// A non-zero exit status becomes [`VolumeError::Failed`] carrying the same
/// combined output, so nothing the utility said is lost.
#[cfg(any(target_os = "macos", target_os = "linux", test))]
pub(crate) fn run_utility(program: &str, args: &[&str]) -> Result<String, VolumeError> {
    let command = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");

    let output = std::process::Command::new(program)
        .args(args)
        .output()
        .map_err(|source| VolumeError::Spawn {
            command: command.clone(),
            source,
        })?;

    let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stderr);
    }

    if output.status.success() {
        Ok(text)
    } else {
        Err(VolumeError::Failed {
            command,
            status: output.status,
            output: text,
        })
    }
}
