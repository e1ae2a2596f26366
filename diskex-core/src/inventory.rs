//! The device inventory collaborator.
use crate::device::{Device, DeviceInfo};
use crate::error::InventoryError;
use tracing::{debug, warn};

/// Lists candidate devices and queries their attributes.
pub trait Inventory {
    /// Returns the identifiers of the external physical whole devices.
    fn list_devices(&self) -> Result<Vec<String>, InventoryError>;

    /// Fetches capacity and health status of one device.
    fn device_info(&self, name: &str) -> Result<DeviceInfo, InventoryError>;

    /// Builds the full [`Device`] (paths included) for an identifier.
    fn describe(&self, name: &str, info: DeviceInfo) -> Device;
}

/// The outcome of a discovery pass.
#[derive(Debug, Default)]
pub struct Discovery {
    pub devices: Vec<Device>,
    /// Devices that were listed but whose attributes could not be fetched.
    pub failures: Vec<(String, InventoryError)>,
}

/// Lists all devices and fetches the attributes of each.
///
/// Only a failure to list is fatal. A device whose attribute query fails is
/// recorded in [`Discovery::failures`] and the remaining devices are still
/// queried.
pub fn discover(inventory: &dyn Inventory) -> Result<Discovery, InventoryError> {
    let mut discovery = Discovery::default();
    for name in inventory.list_devices()? {
        match inventory.device_info(&name) {
            Ok(info) => {
                debug!(device = %name, total_bytes = info.total_bytes, health = %info.health_status, "found device");
                discovery.devices.push(inventory.describe(&name, info));
            }
            Err(e) => {
                warn!(device = %name, error = %e, "could not query device");
                discovery.failures.push((name, e));
            }
        }
    }
    Ok(discovery)
}
