//! The core, UI-agnostic library for the `diskex` disk exercise utility.
//!
//! `diskex-core` is designed to be used as a library by any front-end, whether it's
//! a command-line interface (like `diskex`) or a graphical user interface. It
//! discovers external whole disks, unmounts them, reads every byte through the
//! raw device path to surface latent sector errors, and remounts them again no
//! matter how the read ends.
//!
//! The library is structured into several key modules:
//! - [`device`]: Contains the cross-platform `Device` struct.
//! - [`inventory`] and [`platform`]: Discover devices and query their size and
//!   health status.
//! - [`volume`]: Unmounts and remounts whole devices.
//! - [`session`]: The exercise session itself, with its exactly-once remount
//!   guarantee built on [`cleanup`] and [`interrupt`].
//! - [`progress`]: Pure progress and size formatting.
//!
//! The primary entry point is [`session::ExerciseSession::run`]. It reports
//! what it is doing through an observer, allowing the calling application to
//! display progress in any way it chooses.
//!
//! ## Example: Exercising a Device with Progress Reporting
//!
//! ```rust,no_run
//! use diskex_core::interrupt::Interrupts;
//! use diskex_core::platform::{SystemInventory, SystemVolumes};
//! use diskex_core::session::{ExerciseEvent, ExerciseSession};
//! use diskex_core::inventory;
//! use std::sync::Arc;
//! use anyhow::Result;
//!
//! fn main() -> Result<()> {
//!     let discovery = inventory::discover(&SystemInventory::new())?;
//!     let device = discovery.devices.first().expect("No external devices found.").clone();
//!
//!     // Remount and exit if the operator presses Ctrl+C mid-read.
//!     let interrupts = Interrupts::install(|code| std::process::exit(code))?;
//!
//!     let on_event = |event: &ExerciseEvent| {
//!         if let ExerciseEvent::Progress(progress) = event {
//!             println!("{}", progress.render());
//!         }
//!     };
//!
//!     let bytes = ExerciseSession::new(device, Arc::new(SystemVolumes::new()))
//!         .with_observer(on_event)
//!         .run(&interrupts)?;
//!
//!     println!("Read {bytes} bytes without error.");
//!
//!     Ok(())
//! }
//! ```

pub mod cleanup;
pub mod device;
pub mod diskutil;
pub mod error;
pub mod interrupt;
pub mod inventory;
pub mod platform;
pub mod progress;
pub mod raw;
pub mod session;
pub mod volume;

pub use device::{Device, DeviceInfo};
pub use error::{ExerciseError, InventoryError, VolumeError};
pub use session::{ExerciseEvent, ExerciseOptions, ExerciseSession, SessionState};
