//! Raw device access for the read pass.
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::Path;

/// Alignment of the read buffer. Covers the logical block size of every disk
/// we expect to see, which `O_DIRECT` requires for buffer address and length.
pub const BUFFER_ALIGNMENT: usize = 4096;

/// Flags added to the read-only open on Linux.
///
/// No `O_EXCL`: on a block device it claims the device, and `mount(2)` then
/// fails with `EBUSY` for as long as the reader is open. The remount after an
/// interrupt runs while the read pass still holds its descriptor.
#[cfg(target_os = "linux")]
const LINUX_OPEN_FLAGS: libc::c_int = libc::O_DIRECT;

/// A device opened for unbuffered sequential reads.
#[derive(Debug)]
pub struct RawDevice {
    file: File,
}

impl RawDevice {
    /// Opens the raw path of a device.
    ///
    /// On macOS the raw path is already the character-special `/dev/rdiskN`
    /// node. On Linux the block node is opened with `O_DIRECT` to bypass the
    /// page cache.
    pub fn open(path: &Path) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true);
        #[cfg(target_os = "linux")]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(LINUX_OPEN_FLAGS);
        }
        Ok(Self {
            file: options.open(path)?,
        })
    }
}

impl Read for RawDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

/// A heap buffer whose usable slice starts on a [`BUFFER_ALIGNMENT`] boundary.
pub struct ChunkBuffer {
    buf: Vec<u8>,
    offset: usize,
    len: usize,
}

impl ChunkBuffer {
    pub fn new(len: usize) -> Self {
        // Over-allocate and slice from the first aligned address.
        let buf = vec![0u8; len + BUFFER_ALIGNMENT];
        let offset = buf.as_ptr().align_offset(BUFFER_ALIGNMENT);
        Self { buf, offset, len }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf[self.offset..self.offset + self.len]
    }
}
