use crate::progress::format_size;
use std::fmt;
use std::path::PathBuf;

/// Represents a whole physical storage device discovered on the system.
///
/// This struct holds cross-platform information about a device, such as its
/// identifier, its block and raw paths, its declared capacity and its health
/// status. It is populated by an [`crate::inventory::Inventory`] and is never
/// mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    /// The stable OS identifier of the whole device (e.g., `disk4` or `sdb`).
    pub name: String,
    /// The buffered block path (e.g., `/dev/disk4` or `/dev/sdb`).
    pub path: PathBuf,
    /// The unbuffered path used for the read pass (e.g., `/dev/rdisk4`).
    pub raw_path: PathBuf,
    /// The declared capacity in bytes. Zero means unknown.
    pub total_bytes: u64,
    /// The health summary reported by the platform (e.g., "Verified").
    pub health_status: String,
}

/// The attributes returned by a per-device inventory query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub health_status: String,
    pub total_bytes: u64,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<8}  {:<10}  {}",
            self.name,
            format_size(self.total_bytes),
            self.health_status
        )
    }
}
