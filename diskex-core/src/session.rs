//! The exercise session: unmount, raw sequential read, guaranteed remount.
//!
//! A session runs against exactly one [`Device`] and moves through
//!
//! ```text
//! Created → Unmounting → UnmountFailed
//!                      → Reading → ReadFailed | Interrupted | Completed → RemountAttempted
//! ```
//!
//! Once the unmount has succeeded, the remount is wrapped in a [`Cleanup`]
//! guard shared by the normal teardown and the interrupt handler, so it runs
//! exactly once whichever way the session ends. A failed remount is reported
//! as [`ExerciseEvent::RemountFailed`] and never changes the session result.
use crate::cleanup::Cleanup;
use crate::device::Device;
use crate::error::{ExerciseError, VolumeError};
use crate::interrupt::{Armed, Interrupts};
use crate::progress::Progress;
use crate::raw::{ChunkBuffer, RawDevice};
use crate::volume::VolumeControl;
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn};

/// Default read chunk: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Emit a debug log line every this many bytes read.
const LOG_INTERVAL: u64 = 1 << 30;

/// Tunables of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExerciseOptions {
    /// Size of each raw read. Must be a multiple of 4 KiB between
    /// [`MIN_CHUNK_SIZE`] and [`MAX_CHUNK_SIZE`]; only the granularity of
    /// progress updates depends on it.
    pub chunk_size: usize,
}

impl Default for ExerciseOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ExerciseOptions {
    pub fn with_chunk_size(chunk_size: usize) -> Result<Self, String> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(format!(
                "chunk size must be between {} KiB and {} MiB",
                MIN_CHUNK_SIZE / 1024,
                MAX_CHUNK_SIZE / (1024 * 1024)
            ));
        }
        if chunk_size % MIN_CHUNK_SIZE != 0 {
            return Err("chunk size must be a multiple of 4 KiB".to_string());
        }
        Ok(Self { chunk_size })
    }
}

/// The states a session moves through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unmounting,
    UnmountFailed,
    Reading,
    ReadFailed,
    Interrupted,
    Completed,
    RemountAttempted,
}

/// Everything a session reports while it runs.
#[derive(Debug)]
pub enum ExerciseEvent {
    State(SessionState),
    /// The unmount succeeded; `output` is the utility's diagnostic text.
    Unmounted { output: String },
    /// The raw path is open and the first read is about to be issued.
    ReadStarted { raw_path: PathBuf, total_bytes: u64 },
    Progress(Progress),
    Remounting,
    Remounted { output: String },
    /// The remount failed. The device is left unmounted and needs manual
    /// attention, but the session result is unaffected.
    RemountFailed(VolumeError),
}

/// Receives session events.
///
/// Events can arrive from the interrupt listener's thread, hence the
/// `Send + Sync` bound. Any `Fn(&ExerciseEvent)` closure is an observer.
pub trait ExerciseObserver: Send + Sync {
    fn on_event(&self, event: &ExerciseEvent);
}

impl<F> ExerciseObserver for F
where
    F: Fn(&ExerciseEvent) + Send + Sync,
{
    fn on_event(&self, event: &ExerciseEvent) {
        self(event)
    }
}

/// One run of the read pass against one device.
pub struct ExerciseSession {
    device: Arc<Device>,
    volumes: Arc<dyn VolumeControl>,
    observer: Arc<dyn ExerciseObserver>,
    options: ExerciseOptions,
    bytes_read: u64,
}

/// Runs the remount when dropped, then disarms the interrupt handler.
///
/// Field order matters: `Drop::drop` runs before the fields are dropped, so
/// the handler stays armed until the remount has happened.
struct Teardown {
    remount: Arc<Cleanup>,
    _armed: Armed,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.remount.run();
    }
}

impl ExerciseSession {
    pub fn new(device: Device, volumes: Arc<dyn VolumeControl>) -> Self {
        Self {
            device: Arc::new(device),
            volumes,
            observer: Arc::new(|_: &ExerciseEvent| {}),
            options: ExerciseOptions::default(),
            bytes_read: 0,
        }
    }

    pub fn with_observer(mut self, observer: impl ExerciseObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn with_options(mut self, options: ExerciseOptions) -> Self {
        self.options = options;
        self
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Exercises the device through its raw path.
    ///
    /// The caller must already have the operator's confirmation. Returns the
    /// number of bytes read on success. If an interrupt arrives while the
    /// session is active this function does not return: the device is
    /// remounted and the process exits through the `interrupts` exit hook.
    pub fn run(self, interrupts: &Interrupts) -> Result<u64, ExerciseError> {
        self.run_with(interrupts, RawDevice::open)
    }

    /// Like [`ExerciseSession::run`], but opens the raw path with `open`.
    pub fn run_with<R, O>(mut self, interrupts: &Interrupts, open: O) -> Result<u64, ExerciseError>
    where
        R: Read,
        O: FnOnce(&Path) -> io::Result<R>,
    {
        let span = info_span!("exercise", device = %self.device.name);
        let _enter = span.enter();

        self.emit(ExerciseEvent::State(SessionState::Unmounting));
        info!("unmounting");
        match self.volumes.unmount(&self.device) {
            Ok(output) => self.emit(ExerciseEvent::Unmounted { output }),
            Err(source) => {
                error!(error = %source, "unmount failed");
                self.emit(ExerciseEvent::State(SessionState::UnmountFailed));
                return Err(ExerciseError::UnmountFailed {
                    device: self.device.name.clone(),
                    source,
                });
            }
        }

        let remount = Arc::new(self.remount_action());
        let teardown = Teardown {
            remount: remount.clone(),
            _armed: interrupts.arm(self.interrupt_handler(remount)),
        };

        let result = self.read_pass(open);
        drop(teardown);
        result
    }

    /// The remount, wrapped so that it runs at most once.
    fn remount_action(&self) -> Cleanup {
        let device = self.device.clone();
        let volumes = self.volumes.clone();
        let observer = self.observer.clone();
        Cleanup::new(move || {
            observer.on_event(&ExerciseEvent::Remounting);
            info!(device = %device.name, "remounting");
            match volumes.mount(&device) {
                Ok(output) => observer.on_event(&ExerciseEvent::Remounted { output }),
                Err(e) => {
                    warn!(device = %device.name, error = %e, "remount failed, device left unmounted");
                    observer.on_event(&ExerciseEvent::RemountFailed(e));
                }
            }
            observer.on_event(&ExerciseEvent::State(SessionState::RemountAttempted));
        })
    }

    fn interrupt_handler(&self, remount: Arc<Cleanup>) -> impl Fn() + Send + Sync + 'static {
        let observer = self.observer.clone();
        let device = self.device.name.clone();
        move || {
            warn!(device = %device, "interrupted, remounting before exit");
            observer.on_event(&ExerciseEvent::State(SessionState::Interrupted));
            remount.run();
        }
    }

    fn read_pass<R, O>(&mut self, open: O) -> Result<u64, ExerciseError>
    where
        R: Read,
        O: FnOnce(&Path) -> io::Result<R>,
    {
        self.emit(ExerciseEvent::State(SessionState::Reading));
        let total_bytes = self.device.total_bytes;

        let mut reader = match open(&self.device.raw_path) {
            Ok(reader) => reader,
            Err(source) => return Err(self.read_failed(source)),
        };
        info!(raw_path = %self.device.raw_path.display(), total_bytes, "reading");
        self.emit(ExerciseEvent::ReadStarted {
            raw_path: self.device.raw_path.clone(),
            total_bytes,
        });

        let mut buffer = ChunkBuffer::new(self.options.chunk_size);
        loop {
            match reader.read(buffer.as_mut_slice()) {
                Ok(0) => break,
                Ok(n) => {
                    let before = self.bytes_read;
                    self.bytes_read += n as u64;
                    if before / LOG_INTERVAL != self.bytes_read / LOG_INTERVAL {
                        debug!(bytes_read = self.bytes_read, "read progress");
                    }
                    self.emit(ExerciseEvent::Progress(Progress::new(
                        self.bytes_read,
                        total_bytes,
                    )));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => return Err(self.read_failed(source)),
            }
        }

        if total_bytes != 0 && self.bytes_read != total_bytes {
            debug!(
                bytes_read = self.bytes_read,
                total_bytes, "medium size differs from declared capacity"
            );
        }
        info!(bytes_read = self.bytes_read, "read complete");
        self.emit(ExerciseEvent::State(SessionState::Completed));
        Ok(self.bytes_read)
    }

    fn read_failed(&self, source: io::Error) -> ExerciseError {
        error!(bytes_read = self.bytes_read, error = %source, "read failed");
        self.emit(ExerciseEvent::State(SessionState::ReadFailed));
        ExerciseError::ReadFailed {
            device: self.device.name.clone(),
            bytes_read: self.bytes_read,
            source,
        }
    }

    fn emit(&self, event: ExerciseEvent) {
        self.observer.on_event(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chunk_is_one_mebibyte() {
        assert_eq!(ExerciseOptions::default().chunk_size, 1024 * 1024);
    }

    #[test]
    fn chunk_size_bounds() {
        assert!(ExerciseOptions::with_chunk_size(4 * 1024).is_ok());
        assert!(ExerciseOptions::with_chunk_size(16 * 1024 * 1024).is_ok());
        assert!(ExerciseOptions::with_chunk_size(512).is_err());
        assert!(ExerciseOptions::with_chunk_size(32 * 1024 * 1024).is_err());
        assert!(ExerciseOptions::with_chunk_size(6 * 1024 + 1).is_err());
    }
}
