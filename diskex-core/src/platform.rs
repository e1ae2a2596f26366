//! Provides platform-specific functionality.
//!
//! This module contains the logic for interacting with the operating system to
//! discover external whole disks and to unmount and remount them around a read
//! pass.
//!
//! It uses conditional compilation (`#[cfg]`) to expose the correct implementation
//! for the target OS. Each submodule exposes the same public API, a
//! `SystemInventory` implementing [`crate::inventory::Inventory`] and a
//! `SystemVolumes` implementing [`crate::volume::VolumeControl`], so that the
//! rest of the library and the front-ends can use them without worrying about
//! the underlying platform.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::*;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub use self::macos::*;

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod unsupported;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub use self::unsupported::*;
