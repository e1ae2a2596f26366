use crate::device::{Device, DeviceInfo};
use crate::error::{InventoryError, VolumeError};
use crate::inventory::Inventory;
use crate::volume::VolumeControl;
use std::path::PathBuf;

/// Device discovery for platforms without a backend.
///
/// Only macOS and Linux have a backend; Windows and the BSDs land here. Every
/// query fails with [`InventoryError::Unsupported`], which front-ends report
/// as a fatal listing error.
#[derive(Debug, Default)]
pub struct SystemInventory;

impl SystemInventory {
    pub fn new() -> Self {
        Self
    }
}

impl Inventory for SystemInventory {
    fn list_devices(&self) -> Result<Vec<String>, InventoryError> {
        Err(InventoryError::Unsupported)
    }

    fn device_info(&self, _name: &str) -> Result<DeviceInfo, InventoryError> {
        Err(InventoryError::Unsupported)
    }

    fn describe(&self, name: &str, info: DeviceInfo) -> Device {
        Device {
            name: name.to_string(),
            path: PathBuf::from(name),
            raw_path: PathBuf::from(name),
            total_bytes: info.total_bytes,
            health_status: info.health_status,
        }
    }
}

#[derive(Debug, Default)]
pub struct SystemVolumes;

impl SystemVolumes {
    pub fn new() -> Self {
        Self
    }
}

impl VolumeControl for SystemVolumes {
    fn unmount(&self, _device: &Device) -> Result<String, VolumeError> {
        Err(VolumeError::Unsupported)
    }

    fn mount(&self, _device: &Device) -> Result<String, VolumeError> {
        Err(VolumeError::Unsupported)
    }
}
