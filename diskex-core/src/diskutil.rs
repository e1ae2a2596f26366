//! Parsing of the macOS `diskutil` property-list output.
//!
//! Kept free of any platform gating so the parsers can be tested on every
//! host; only the code that actually spawns `diskutil` lives in
//! `platform::macos`.
use crate::device::DeviceInfo;
use serde::Deserialize;
use std::path::PathBuf;

/// Health status used when `diskutil` does not report one.
pub const UNKNOWN_HEALTH: &str = "Unknown";

#[derive(Debug, Deserialize)]
struct DiskList {
    #[serde(rename = "WholeDisks", default)]
    whole_disks: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DiskInfo {
    #[serde(rename = "SMARTStatus")]
    smart_status: Option<String>,
    #[serde(rename = "TotalSize", default)]
    total_size: u64,
}

/// Extracts the whole-disk identifiers from `diskutil list -plist`.
pub fn parse_list(plist: &[u8]) -> Result<Vec<String>, plist::Error> {
    let list: DiskList = plist::from_bytes(plist)?;
    Ok(list.whole_disks)
}

/// Extracts capacity and SMART status from `diskutil info -plist`.
pub fn parse_info(plist: &[u8]) -> Result<DeviceInfo, plist::Error> {
    let info: DiskInfo = plist::from_bytes(plist)?;
    Ok(DeviceInfo {
        health_status: info
            .smart_status
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNKNOWN_HEALTH.to_string()),
        total_bytes: info.total_size,
    })
}

/// The buffered block node of a disk, e.g. `/dev/disk4`.
pub fn block_path(name: &str) -> PathBuf {
    PathBuf::from(format!("/dev/{name}"))
}

/// The raw character node of a disk, e.g. `/dev/rdisk4`.
pub fn raw_path(name: &str) -> PathBuf {
    PathBuf::from(format!("/dev/r{name}"))
}
