use crate::device::{Device, DeviceInfo};
use crate::error::{InventoryError, VolumeError};
use crate::inventory::Inventory;
use crate::volume::{VolumeControl, run_utility};
use nix::mount::{MsFlags, mount, umount};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// `/sys/block/<dev>/size` is always expressed in 512-byte sectors.
const SECTOR_SIZE: u64 = 512;

/// Health status used when SMART data cannot be obtained.
pub const UNSUPPORTED_HEALTH: &str = "Not Supported";

/// Helper to read a specific file from the /sys/block filesystem.
fn read_sys_file(device_name: &str, file: &str) -> io::Result<String> {
    let path = PathBuf::from("/sys/block").join(device_name).join(file);
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

/// Helper to find the parent device of a partition (e.g., /dev/sda1 -> /dev/sda).
fn get_parent_device_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str.starts_with("/dev/sd") {
        if let Some(index) = path_str.rfind(|c: char| c.is_alphabetic()) {
            return PathBuf::from(&path_str[..=index]);
        }
    } else if path_str.starts_with("/dev/mmcblk") || path_str.starts_with("/dev/nvme") {
        if let Some(index) = path_str.find('p') {
            return PathBuf::from(&path_str[..index]);
        }
    }

    path.to_path_buf()
}

/// The `/dev` path of a `sysinfo` disk, whether it reports `sdb1` or `/dev/sdb1`.
fn disk_dev_path(disk: &sysinfo::Disk) -> PathBuf {
    PathBuf::from("/dev/").join(disk.name())
}

/// A device counts as external if the kernel flags it removable or if it
/// hangs off a USB bus; many USB hard drives report `removable` as 0.
fn is_external(device_name: &str) -> bool {
    let removable = read_sys_file(device_name, "removable")
        .map(|s| s == "1")
        .unwrap_or(false);
    if removable {
        return true;
    }
    fs::canonicalize(PathBuf::from("/sys/block").join(device_name))
        .map(|p| p.to_string_lossy().contains("/usb"))
        .unwrap_or(false)
}

fn sectors_to_bytes(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok()?.checked_mul(SECTOR_SIZE)
}

#[derive(Debug, Deserialize)]
struct SmartctlReport {
    smart_status: Option<SmartctlStatus>,
}

#[derive(Debug, Deserialize)]
struct SmartctlStatus {
    passed: bool,
}

/// Maps `smartctl -H --json` output onto the status strings `diskutil` uses.
fn parse_smartctl_health(json: &[u8]) -> Option<String> {
    let report: SmartctlReport = serde_json::from_slice(json).ok()?;
    let status = report.smart_status?;
    Some(if status.passed { "Verified" } else { "Failing" }.to_string())
}

fn query_health(path: &Path) -> String {
    // smartctl encodes findings in its exit status bits, so stdout is parsed
    // whatever the status.
    match Command::new("smartctl").arg("-H").arg("--json").arg(path).output() {
        Ok(output) => parse_smartctl_health(&output.stdout)
            .unwrap_or_else(|| UNSUPPORTED_HEALTH.to_string()),
        Err(e) => {
            debug!(error = %e, "smartctl unavailable");
            UNSUPPORTED_HEALTH.to_string()
        }
    }
}

/// Device discovery backed by `/sys/block`, `sysinfo` and `smartctl`.
///
/// This inventory discovers devices by iterating through the `/sys/block`
/// directory and applies several filters so that only external whole disks are
/// returned:
/// 1.  The disk holding the root filesystem is excluded.
/// 2.  Loop devices are skipped.
/// 3.  The device must be removable or attached over USB.
/// 4.  Devices that report a size of zero (e.g., empty card readers) are skipped.
#[derive(Debug, Default)]
pub struct SystemInventory;

impl SystemInventory {
    pub fn new() -> Self {
        Self
    }
}

impl Inventory for SystemInventory {
    fn list_devices(&self) -> Result<Vec<String>, InventoryError> {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        let system_disk_parent = disks
            .iter()
            .find(|disk| disk.mount_point() == Path::new("/"))
            .map(|disk| get_parent_device_path(&disk_dev_path(disk)))
            .ok_or_else(|| InventoryError::Unavailable("Could not determine system drive.".into()))?;

        let block_dir = fs::read_dir("/sys/block").map_err(|source| InventoryError::Io {
            path: "/sys/block".to_string(),
            source,
        })?;

        let mut names = Vec::new();
        for entry in block_dir.filter_map(Result::ok) {
            let device_name = entry.file_name().to_string_lossy().to_string();
            let device_path = PathBuf::from("/dev/").join(&device_name);

            if device_name.starts_with("loop") || device_path == system_disk_parent {
                continue;
            }
            if !is_external(&device_name) {
                continue;
            }

            let size = read_sys_file(&device_name, "size")
                .ok()
                .and_then(|s| sectors_to_bytes(&s))
                .unwrap_or(0);
            if size == 0 {
                continue;
            }

            names.push(device_name);
        }

        names.sort();
        Ok(names)
    }

    fn device_info(&self, name: &str) -> Result<DeviceInfo, InventoryError> {
        let raw = read_sys_file(name, "size").map_err(|source| InventoryError::Io {
            path: format!("/sys/block/{name}/size"),
            source,
        })?;
        let total_bytes = sectors_to_bytes(&raw).ok_or_else(|| InventoryError::Parse {
            command: format!("cat /sys/block/{name}/size"),
            message: format!("unexpected sector count {raw:?}"),
        })?;

        Ok(DeviceInfo {
            health_status: query_health(&PathBuf::from("/dev/").join(name)),
            total_bytes,
        })
    }

    fn describe(&self, name: &str, info: DeviceInfo) -> Device {
        // The block node doubles as the raw path; `RawDevice` bypasses the
        // page cache with O_DIRECT.
        let path = PathBuf::from("/dev/").join(name);
        Device {
            name: name.to_string(),
            raw_path: path.clone(),
            path,
            total_bytes: info.total_bytes,
            health_status: info.health_status,
        }
    }
}

const MOUNT_TABLE: &str = "/proc/self/mounts";

/// Options the kernel reports but that `mount(2)` does not accept back.
const DISPLAY_ONLY_OPTIONS: &[&str] = &["seclabel"];

/// One line of the mount table.
#[derive(Clone, Debug, PartialEq, Eq)]
struct MountEntry {
    source: PathBuf,
    target: PathBuf,
    fstype: String,
    /// The options column as the kernel reports it, e.g. `ro,noexec,relatime`.
    options: String,
}

impl MountEntry {
    /// FUSE mounts (`fuseblk` for ntfs-3g, `fuse.*`) need their userspace
    /// helper and cannot be restored with a bare `mount(2)`.
    fn is_fuse(&self) -> bool {
        self.fstype.starts_with("fuse")
    }
}

/// Undoes the octal escapes (`\040` for a space) used in the mount table.
fn unescape_mount_field(field: &str) -> PathBuf {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..=i + 3].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = bytes[i + 1..=i + 3]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    PathBuf::from(OsString::from_vec(out))
}

fn parse_mount_table(table: &str) -> Vec<MountEntry> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fstype = fields.next()?;
            let options = fields.next()?;
            Some(MountEntry {
                source: unescape_mount_field(source),
                target: unescape_mount_field(target),
                fstype: fstype.to_string(),
                options: options.to_string(),
            })
        })
        .collect()
}

/// The mounted partitions of the whole disk at `device_path`, deepest mount
/// point first so nested mounts go before their parents.
fn partitions_of(table: &[MountEntry], device_path: &Path) -> Vec<MountEntry> {
    let mut entries: Vec<MountEntry> = table
        .iter()
        .filter(|e| e.source.starts_with("/dev/") && get_parent_device_path(&e.source) == device_path)
        .cloned()
        .collect();
    entries.sort_by_key(|e| std::cmp::Reverse(e.target.components().count()));
    entries
}

/// The `mount(2)` flag for a generic mount option.
///
/// `Some(MsFlags::empty())` for options that only state a default.
fn mount_flag(option: &str) -> Option<MsFlags> {
    let flag = match option {
        "rw" | "defaults" => MsFlags::empty(),
        "ro" => MsFlags::MS_RDONLY,
        "nosuid" => MsFlags::MS_NOSUID,
        "nodev" => MsFlags::MS_NODEV,
        "noexec" => MsFlags::MS_NOEXEC,
        "sync" => MsFlags::MS_SYNCHRONOUS,
        "dirsync" => MsFlags::MS_DIRSYNC,
        "mand" => MsFlags::MS_MANDLOCK,
        "noatime" => MsFlags::MS_NOATIME,
        "nodiratime" => MsFlags::MS_NODIRATIME,
        "relatime" => MsFlags::MS_RELATIME,
        "strictatime" => MsFlags::MS_STRICTATIME,
        "lazytime" => MsFlags::MS_LAZYTIME,
        "silent" => MsFlags::MS_SILENT,
        _ => return None,
    };
    Some(flag)
}

/// Splits a mount-table options column into `mount(2)` flags and the
/// filesystem-specific data string (`uid=1000,umask=022`, `errors=remount-ro`).
fn mount_options(options: &str) -> (MsFlags, String) {
    let mut flags = MsFlags::empty();
    let mut data = Vec::new();
    for option in options.split(',').filter(|o| !o.is_empty()) {
        if DISPLAY_ONLY_OPTIONS.contains(&option) {
            continue;
        }
        match mount_flag(option) {
            Some(flag) => flags |= flag,
            None => data.push(option),
        }
    }
    (flags, data.join(","))
}

/// Arguments for `mount(8)` when a FUSE volume has to be restored through its
/// helper. Only the generic options are passed on; the FUSE-internal ones
/// (`user_id=`, `group_id=`) are set by the helper itself.
fn utility_mount_args(entry: &MountEntry) -> Vec<String> {
    let generic = entry
        .options
        .split(',')
        .filter(|o| mount_flag(o).is_some())
        .collect::<Vec<_>>()
        .join(",");
    let mut args = Vec::new();
    if !generic.is_empty() {
        args.push("-o".to_string());
        args.push(generic);
    }
    args.push(entry.source.to_string_lossy().into_owned());
    args.push(entry.target.to_string_lossy().into_owned());
    args
}

fn mount_entry(entry: &MountEntry) -> Result<(), VolumeError> {
    if entry.is_fuse() {
        let args = utility_mount_args(entry);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        return run_utility("mount", &args).map(|_| ());
    }

    let (flags, data) = mount_options(&entry.options);
    mount(
        Some(entry.source.as_path()),
        entry.target.as_path(),
        Some(entry.fstype.as_str()),
        flags,
        (!data.is_empty()).then_some(data.as_str()),
    )
    .map_err(|e| VolumeError::System {
        operation: "mount",
        target: entry.source.display().to_string(),
        message: e.to_string(),
    })
}

/// Whole-disk unmount and mount for Linux.
///
/// Linux has no whole-disk unmount, so every mounted partition of the device
/// is unmounted individually. The entries of `/proc/self/mounts`, options
/// included, are remembered until [`VolumeControl::mount`] restores them, so a
/// read-only volume comes back read-only.
#[derive(Debug, Default)]
pub struct SystemVolumes {
    unmounted: Mutex<HashMap<String, Vec<MountEntry>>>,
}

impl SystemVolumes {
    pub fn new() -> Self {
        Self::default()
    }

    fn mounted_partitions(device: &Device) -> Result<Vec<MountEntry>, VolumeError> {
        let table = fs::read_to_string(MOUNT_TABLE).map_err(|e| VolumeError::System {
            operation: "read mount table",
            target: MOUNT_TABLE.to_string(),
            message: e.to_string(),
        })?;
        Ok(partitions_of(&parse_mount_table(&table), &device.path))
    }
}

impl VolumeControl for SystemVolumes {
    fn unmount(&self, device: &Device) -> Result<String, VolumeError> {
        let entries = Self::mounted_partitions(device)?;
        if entries.is_empty() {
            return Ok(format!("No mounted volumes on {}", device.path.display()));
        }

        let mut lines = Vec::new();
        for (i, entry) in entries.iter().enumerate() {
            if let Err(e) = umount(entry.target.as_path()) {
                // Put back what was already unmounted so a failed unmount
                // leaves the device as it was.
                for done in entries[..i].iter().rev() {
                    if let Err(err) = mount_entry(done) {
                        warn!(error = %err, "could not restore mount after failed unmount");
                    }
                }
                return Err(VolumeError::System {
                    operation: "unmount",
                    target: entry.target.display().to_string(),
                    message: e.to_string(),
                });
            }
            debug!(source = %entry.source.display(), target = %entry.target.display(), "unmounted");
            lines.push(format!(
                "Unmounted {} from {}",
                entry.source.display(),
                entry.target.display()
            ));
        }

        self.unmounted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.name.clone(), entries);
        Ok(lines.join("\n"))
    }

    fn mount(&self, device: &Device) -> Result<String, VolumeError> {
        let entries = self
            .unmounted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&device.name)
            .unwrap_or_default();
        if entries.is_empty() {
            return Ok(format!("Nothing to remount on {}", device.path.display()));
        }

        let mut lines = Vec::new();
        let mut failures = Vec::new();
        for entry in entries.iter().rev() {
            match mount_entry(entry) {
                Ok(()) => lines.push(format!(
                    "Mounted {} on {}",
                    entry.source.display(),
                    entry.target.display()
                )),
                Err(e) => failures.push(e.to_string()),
            }
        }

        if failures.is_empty() {
            Ok(lines.join("\n"))
        } else {
            Err(VolumeError::System {
                operation: "mount",
                target: device.path.display().to_string(),
                message: failures.join("; "),
            })
        }
    }
}
