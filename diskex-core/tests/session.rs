use diskex_core::error::{ExerciseError, VolumeError};
use diskex_core::interrupt::{INTERRUPTED_EXIT_CODE, Interrupts};
use diskex_core::raw::RawDevice;
use diskex_core::session::{ExerciseEvent, ExerciseOptions, ExerciseSession, SessionState};
use diskex_core::volume::VolumeControl;
use diskex_core::{Device, progress::Progress};
use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const MIB: u64 = 1024 * 1024;

#[derive(Default)]
struct FakeVolumes {
    fail_unmount: bool,
    fail_mount: bool,
    unmounts: AtomicUsize,
    mounts: AtomicUsize,
    /// Set while the session's reader is alive, if the test tracks it.
    reader_open: Option<Arc<AtomicBool>>,
    mounted_while_reading: AtomicBool,
}

impl FakeVolumes {
    fn unmounts(&self) -> usize {
        self.unmounts.load(Ordering::SeqCst)
    }

    fn mounts(&self) -> usize {
        self.mounts.load(Ordering::SeqCst)
    }
}

impl VolumeControl for FakeVolumes {
    fn unmount(&self, device: &Device) -> Result<String, VolumeError> {
        self.unmounts.fetch_add(1, Ordering::SeqCst);
        if self.fail_unmount {
            return Err(VolumeError::System {
                operation: "unmount",
                target: device.path.display().to_string(),
                message: "Resource busy".to_string(),
            });
        }
        Ok(format!("Unmount of all volumes on {} was successful", device.name))
    }

    fn mount(&self, device: &Device) -> Result<String, VolumeError> {
        self.mounts.fetch_add(1, Ordering::SeqCst);
        if let Some(open) = &self.reader_open {
            self.mounted_while_reading
                .store(open.load(Ordering::SeqCst), Ordering::SeqCst);
        }
        if self.fail_mount {
            return Err(VolumeError::System {
                operation: "mount",
                target: device.path.display().to_string(),
                message: "Volume on disk failed to mount".to_string(),
            });
        }
        Ok(format!("Volume(s) mounted successfully on {}", device.name))
    }
}

/// Records states and checks that progress never goes backwards.
#[derive(Default)]
struct Recorder {
    states: Mutex<Vec<SessionState>>,
    progress_events: AtomicUsize,
    last_progress: Mutex<Progress>,
    went_backwards: AtomicBool,
    remount_failures: AtomicUsize,
}

impl Recorder {
    fn observe(self: &Arc<Self>) -> impl Fn(&ExerciseEvent) + Send + Sync + 'static {
        let recorder = self.clone();
        move |event: &ExerciseEvent| match event {
            ExerciseEvent::State(state) => recorder.states.lock().unwrap().push(*state),
            ExerciseEvent::Progress(progress) => {
                recorder.progress_events.fetch_add(1, Ordering::SeqCst);
                let mut last = recorder.last_progress.lock().unwrap();
                if progress.bytes_read < last.bytes_read {
                    recorder.went_backwards.store(true, Ordering::SeqCst);
                }
                *last = *progress;
            }
            ExerciseEvent::RemountFailed(_) => {
                recorder.remount_failures.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }

    fn states(&self) -> Vec<SessionState> {
        self.states.lock().unwrap().clone()
    }

    fn count(&self, state: SessionState) -> usize {
        self.states().iter().filter(|s| **s == state).count()
    }
}

/// A medium of a given length that yields zeroes without touching the buffer.
struct Medium {
    len: u64,
    pos: u64,
    fail_at: Option<u64>,
}

impl Medium {
    fn new(len: u64) -> Self {
        Self {
            len,
            pos: 0,
            fail_at: None,
        }
    }

    fn failing_at(len: u64, offset: u64) -> Self {
        Self {
            fail_at: Some(offset),
            ..Self::new(len)
        }
    }
}

impl Read for Medium {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let end = self.fail_at.unwrap_or(self.len).min(self.len);
        if self.pos == end && self.fail_at.is_some() {
            return Err(io::Error::new(ErrorKind::Other, "Input/output error"));
        }
        let n = (buf.len() as u64).min(end - self.pos) as usize;
        self.pos += n as u64;
        Ok(n)
    }
}

/// Calls `hook` once the wrapped reader has produced `at` bytes.
struct Tripwire<R> {
    inner: R,
    at: u64,
    pos: u64,
    hook: Option<Box<dyn FnOnce()>>,
}

impl<R: Read> Read for Tripwire<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.at {
            if let Some(hook) = self.hook.take() {
                hook();
            }
        }
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

/// Keeps `open` set for as long as the wrapped reader is alive.
struct Held<R> {
    inner: R,
    open: Arc<AtomicBool>,
}

impl<R> Held<R> {
    fn new(inner: R, open: Arc<AtomicBool>) -> Self {
        open.store(true, Ordering::SeqCst);
        Self { inner, open }
    }
}

impl<R: Read> Read for Held<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R> Drop for Held<R> {
    fn drop(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Opens through `RawDevice`, or plainly when the filesystem holding the test
/// file rejects `O_DIRECT` (tmpfs does).
fn open_raw(path: &Path) -> io::Result<Box<dyn Read>> {
    match RawDevice::open(path) {
        Ok(raw) => Ok(Box::new(raw)),
        Err(e) if e.kind() == ErrorKind::InvalidInput => Ok(Box::new(File::open(path)?)),
        Err(e) => Err(e),
    }
}

fn device(total_bytes: u64) -> Device {
    Device {
        name: "disk4".to_string(),
        path: PathBuf::from("/dev/disk4"),
        raw_path: PathBuf::from("/dev/rdisk4"),
        total_bytes,
        health_status: "Verified".to_string(),
    }
}

fn recording_interrupts() -> (Interrupts, Arc<Mutex<Vec<i32>>>) {
    let codes = Arc::new(Mutex::new(Vec::new()));
    let c = codes.clone();
    let interrupts = Interrupts::detached(move |code| c.lock().unwrap().push(code));
    (interrupts, codes)
}

#[test]
fn full_read_of_one_terabyte_succeeds_and_remounts_once() {
    const TB: u64 = 1_000_000_000_000;
    let volumes = Arc::new(FakeVolumes::default());
    let recorder = Arc::new(Recorder::default());
    let (interrupts, codes) = recording_interrupts();

    let result = ExerciseSession::new(device(TB), volumes.clone())
        .with_observer(recorder.observe())
        .run_with(&interrupts, |_| Ok(Medium::new(TB)));

    assert_eq!(result.unwrap(), TB);
    assert_eq!(volumes.unmounts(), 1);
    assert_eq!(volumes.mounts(), 1);
    assert!(codes.lock().unwrap().is_empty());
    assert!(!interrupts.is_armed());
    assert!(!recorder.went_backwards.load(Ordering::SeqCst));
    assert_eq!(
        *recorder.last_progress.lock().unwrap(),
        Progress::new(TB, TB)
    );
    assert_eq!(
        recorder.states(),
        [
            SessionState::Unmounting,
            SessionState::Reading,
            SessionState::Completed,
            SessionState::RemountAttempted,
        ]
    );
}

#[test]
fn failed_unmount_never_reads_or_remounts() {
    let volumes = Arc::new(FakeVolumes {
        fail_unmount: true,
        ..Default::default()
    });
    let recorder = Arc::new(Recorder::default());
    let (interrupts, _codes) = recording_interrupts();
    let opened = AtomicBool::new(false);

    let result = ExerciseSession::new(device(64_000_000_000), volumes.clone())
        .with_observer(recorder.observe())
        .run_with(&interrupts, |_| {
            opened.store(true, Ordering::SeqCst);
            Ok(Medium::new(0))
        });

    match result {
        Err(ExerciseError::UnmountFailed { device, source }) => {
            assert_eq!(device, "disk4");
            assert!(source.to_string().contains("Resource busy"));
        }
        other => panic!("expected UnmountFailed, got {other:?}"),
    }
    assert!(!opened.load(Ordering::SeqCst));
    assert_eq!(volumes.mounts(), 0);
    assert!(!interrupts.is_armed());
    assert_eq!(
        recorder.states(),
        [SessionState::Unmounting, SessionState::UnmountFailed]
    );
}

#[test]
fn read_error_after_512_mib_reports_offset_and_remounts_once() {
    let volumes = Arc::new(FakeVolumes::default());
    let recorder = Arc::new(Recorder::default());
    let (interrupts, _codes) = recording_interrupts();

    let result = ExerciseSession::new(device(2_000_000_000), volumes.clone())
        .with_observer(recorder.observe())
        .run_with(&interrupts, |_| Ok(Medium::failing_at(2_000_000_000, 512 * MIB)));

    let err = result.unwrap_err();
    assert_eq!(err.bytes_read(), 536_870_912);
    match err {
        ExerciseError::ReadFailed {
            bytes_read, source, ..
        } => {
            assert_eq!(bytes_read, 536_870_912);
            assert_eq!(source.kind(), ErrorKind::Other);
        }
        other => panic!("expected ReadFailed, got {other:?}"),
    }
    assert_eq!(volumes.mounts(), 1);
    assert_eq!(recorder.progress_events.load(Ordering::SeqCst), 512);
    assert_eq!(recorder.count(SessionState::ReadFailed), 1);
    assert_eq!(recorder.count(SessionState::RemountAttempted), 1);
}

#[test]
fn interrupt_after_300_mib_remounts_once_and_exits_non_zero() {
    let volumes = Arc::new(FakeVolumes::default());
    let recorder = Arc::new(Recorder::default());
    let (interrupts, codes) = recording_interrupts();

    let listener = interrupts.clone();
    let reader = Tripwire {
        inner: Medium::new(1024 * MIB),
        at: 300 * MIB,
        pos: 0,
        hook: Some(Box::new(move || {
            // Signals arrive on the listener's own thread.
            std::thread::spawn(move || listener.raise()).join().unwrap();
        })),
    };

    // The recording exit hook returns instead of exiting, so the read carries
    // on to the end here; the remount must still not run a second time.
    let _ = ExerciseSession::new(device(1024 * MIB), volumes.clone())
        .with_observer(recorder.observe())
        .run_with(&interrupts, |_| Ok(reader));

    assert_eq!(*codes.lock().unwrap(), vec![INTERRUPTED_EXIT_CODE]);
    assert_ne!(INTERRUPTED_EXIT_CODE, 0);
    assert_eq!(volumes.mounts(), 1);
    assert_eq!(recorder.count(SessionState::RemountAttempted), 1);

    let states = recorder.states();
    let interrupted = states
        .iter()
        .position(|s| *s == SessionState::Interrupted)
        .expect("interrupt was not observed");
    let remounted = states
        .iter()
        .position(|s| *s == SessionState::RemountAttempted)
        .unwrap();
    assert!(interrupted < remounted);
    assert!(!interrupts.is_armed());
}

#[test]
fn interrupt_remounts_while_the_raw_reader_is_still_open() {
    let mut file = tempfile::NamedTempFile::new_in(env!("CARGO_TARGET_TMPDIR")).unwrap();
    file.write_all(&vec![0x5Au8; (8 * MIB) as usize]).unwrap();
    file.as_file().sync_all().unwrap();

    let mut target = device(8 * MIB);
    target.raw_path = file.path().to_path_buf();

    let reader_open = Arc::new(AtomicBool::new(false));
    let volumes = Arc::new(FakeVolumes {
        reader_open: Some(reader_open.clone()),
        ..Default::default()
    });
    let recorder = Arc::new(Recorder::default());
    let (interrupts, codes) = recording_interrupts();
    let options = ExerciseOptions::with_chunk_size(64 * 1024).unwrap();

    let listener = interrupts.clone();
    let open_flag = reader_open.clone();
    let result = ExerciseSession::new(target, volumes.clone())
        .with_options(options)
        .with_observer(recorder.observe())
        .run_with(&interrupts, move |path| {
            let raw = open_raw(path)?;
            Ok(Tripwire {
                inner: Held::new(raw, open_flag),
                at: MIB,
                pos: 0,
                hook: Some(Box::new(move || {
                    std::thread::spawn(move || listener.raise()).join().unwrap();
                })),
            })
        });

    assert_eq!(*codes.lock().unwrap(), vec![INTERRUPTED_EXIT_CODE]);
    assert_eq!(volumes.mounts(), 1);
    assert!(volumes.mounted_while_reading.load(Ordering::SeqCst));
    assert_eq!(recorder.remount_failures.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.count(SessionState::RemountAttempted), 1);
    assert_eq!(result.unwrap(), 8 * MIB);
    assert!(!reader_open.load(Ordering::SeqCst));
}

#[test]
fn remount_failure_is_a_warning_not_an_error() {
    let volumes = Arc::new(FakeVolumes {
        fail_mount: true,
        ..Default::default()
    });
    let recorder = Arc::new(Recorder::default());
    let (interrupts, _codes) = recording_interrupts();

    let result = ExerciseSession::new(device(8 * MIB), volumes.clone())
        .with_observer(recorder.observe())
        .run_with(&interrupts, |_| Ok(Medium::new(8 * MIB)));

    assert_eq!(result.unwrap(), 8 * MIB);
    assert_eq!(volumes.mounts(), 1);
    assert_eq!(recorder.remount_failures.load(Ordering::SeqCst), 1);
}

#[test]
fn open_failure_is_a_read_failure_at_offset_zero() {
    let volumes = Arc::new(FakeVolumes::default());
    let (interrupts, _codes) = recording_interrupts();

    let result = ExerciseSession::new(device(8 * MIB), volumes.clone())
        .run_with(&interrupts, |_| -> io::Result<Medium> {
            Err(io::Error::from(ErrorKind::PermissionDenied))
        });

    match result {
        Err(ExerciseError::ReadFailed {
            bytes_read, source, ..
        }) => {
            assert_eq!(bytes_read, 0);
            assert_eq!(source.kind(), ErrorKind::PermissionDenied);
        }
        other => panic!("expected ReadFailed, got {other:?}"),
    }
    assert_eq!(volumes.mounts(), 1);
}

#[test]
fn declared_size_is_advisory() {
    let volumes = Arc::new(FakeVolumes::default());
    let (interrupts, _codes) = recording_interrupts();

    // Larger than declared.
    let bytes = ExerciseSession::new(device(4 * MIB), volumes.clone())
        .run_with(&interrupts, |_| Ok(Medium::new(6 * MIB)))
        .unwrap();
    assert_eq!(bytes, 6 * MIB);

    // Unknown size.
    let recorder = Arc::new(Recorder::default());
    let bytes = ExerciseSession::new(device(0), volumes.clone())
        .with_observer(recorder.observe())
        .run_with(&interrupts, |_| Ok(Medium::new(3 * MIB + 17)))
        .unwrap();
    assert_eq!(bytes, 3 * MIB + 17);
    assert_eq!(recorder.last_progress.lock().unwrap().percent(), None);
    assert_eq!(volumes.mounts(), 2);
}

#[test]
fn interrupted_reads_are_retried() {
    struct Flaky {
        inner: Medium,
        hiccups: usize,
    }
    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.hiccups > 0 {
                self.hiccups -= 1;
                return Err(io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }

    let volumes = Arc::new(FakeVolumes::default());
    let (interrupts, _codes) = recording_interrupts();
    let bytes = ExerciseSession::new(device(2 * MIB), volumes)
        .run_with(&interrupts, |_| {
            Ok(Flaky {
                inner: Medium::new(2 * MIB),
                hiccups: 3,
            })
        })
        .unwrap();
    assert_eq!(bytes, 2 * MIB);
}

#[test]
fn bytes_read_is_the_sum_of_chunks_from_a_real_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let data = vec![0xA5u8; (3 * MIB + 4321) as usize];
    file.write_all(&data).unwrap();
    file.flush().unwrap();

    let mut target = device(data.len() as u64);
    target.raw_path = file.path().to_path_buf();

    let volumes = Arc::new(FakeVolumes::default());
    let recorder = Arc::new(Recorder::default());
    let (interrupts, _codes) = recording_interrupts();
    let options = ExerciseOptions::with_chunk_size(64 * 1024).unwrap();

    let bytes = ExerciseSession::new(target, volumes.clone())
        .with_options(options)
        .with_observer(recorder.observe())
        .run_with(&interrupts, |path| std::fs::File::open(path))
        .unwrap();

    assert_eq!(bytes, data.len() as u64);
    assert!(!recorder.went_backwards.load(Ordering::SeqCst));
    assert!(recorder.progress_events.load(Ordering::SeqCst) >= 49);
    assert_eq!(volumes.mounts(), 1);
}

#[test]
fn panicking_reader_still_remounts() {
    struct Exploding;
    impl Read for Exploding {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            panic!("driver bug");
        }
    }

    let volumes = Arc::new(FakeVolumes::default());
    let (interrupts, _codes) = recording_interrupts();
    let session = ExerciseSession::new(device(MIB), volumes.clone());

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        session.run_with(&interrupts, |_| Ok(Exploding))
    }));

    assert!(outcome.is_err());
    assert_eq!(volumes.mounts(), 1);
    assert!(!interrupts.is_armed());
}
