use crate::device::{Device, DeviceInfo};
use crate::diskutil;
use crate::error::{InventoryError, VolumeError};
use crate::inventory::Inventory;
use crate::volume::{VolumeControl, run_utility};
use std::process::Command;

/// Runs `diskutil` and returns its stdout, failing on a non-zero exit.
fn diskutil_output(args: &[&str]) -> Result<Vec<u8>, InventoryError> {
    let command = format!("diskutil {}", args.join(" "));
    let output = Command::new("diskutil")
        .args(args)
        .output()
        .map_err(|source| InventoryError::Spawn {
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(InventoryError::Failed {
            command,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

/// Device discovery backed by `diskutil`.
///
/// Only external, physical whole disks are listed, which keeps the boot disk
/// and synthesized APFS containers out of the selection.
#[derive(Debug, Default)]
pub struct SystemInventory;

impl SystemInventory {
    pub fn new() -> Self {
        Self
    }
}

impl Inventory for SystemInventory {
    fn list_devices(&self) -> Result<Vec<String>, InventoryError> {
        let args = ["list", "-plist", "external", "physical"];
        let plist = diskutil_output(&args)?;
        diskutil::parse_list(&plist).map_err(|e| InventoryError::Parse {
            command: format!("diskutil {}", args.join(" ")),
            message: e.to_string(),
        })
    }

    fn device_info(&self, name: &str) -> Result<DeviceInfo, InventoryError> {
        let path = diskutil::block_path(name).to_string_lossy().into_owned();
        let plist = diskutil_output(&["info", "-plist", path.as_str()])?;
        diskutil::parse_info(&plist).map_err(|e| InventoryError::Parse {
            command: format!("diskutil info -plist {path}"),
            message: e.to_string(),
        })
    }

    fn describe(&self, name: &str, info: DeviceInfo) -> Device {
        Device {
            name: name.to_string(),
            path: diskutil::block_path(name),
            raw_path: diskutil::raw_path(name),
            total_bytes: info.total_bytes,
            health_status: info.health_status,
        }
    }
}

/// Whole-disk unmount and mount through `diskutil unmountDisk` / `mountDisk`.
#[derive(Debug, Default)]
pub struct SystemVolumes;

impl SystemVolumes {
    pub fn new() -> Self {
        Self
    }
}

impl VolumeControl for SystemVolumes {
    fn unmount(&self, device: &Device) -> Result<String, VolumeError> {
        let path = device.path.to_string_lossy();
        run_utility("diskutil", &["unmountDisk", &*path])
    }

    fn mount(&self, device: &Device) -> Result<String, VolumeError> {
        let path = device.path.to_string_lossy();
        run_utility("diskutil", &["mountDisk", &*path])
    }
}
