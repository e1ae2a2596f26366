//! Progress reporting for the read pass.
//!
//! Everything in this module is a pure function of the byte counters, so a
//! front-end can render the same line whether it draws a progress bar or a
//! plain carriage-return line.

const GB: f64 = 1_000_000_000.0;
const TB: f64 = 1_000_000_000_000.0;

/// A snapshot of the read pass: bytes read so far against the declared size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    pub bytes_read: u64,
    /// The declared capacity of the device. Zero means unknown.
    pub total_bytes: u64,
}

impl Progress {
    pub fn new(bytes_read: u64, total_bytes: u64) -> Self {
        Self {
            bytes_read,
            total_bytes,
        }
    }

    /// Returns the completed percentage, or `None` if the total is unknown.
    ///
    /// The declared total is advisory, so the value may exceed 100 when the
    /// medium turns out to be larger than reported.
    pub fn percent(&self) -> Option<f64> {
        if self.total_bytes == 0 {
            return None;
        }
        Some(self.bytes_read as f64 / self.total_bytes as f64 * 100.0)
    }

    /// Renders the progress as a single display line.
    ///
    /// With a known total this reads `" 50.0%  1.0 GB / 2.0 GB"`; with an
    /// unknown total the percentage is omitted and only the bytes read so far
    /// are shown.
    pub fn render(&self) -> String {
        match self.percent() {
            Some(pct) => format!(
                "{:5.1}%  {} / {}",
                pct,
                format_size(self.bytes_read),
                format_size(self.total_bytes)
            ),
            None => format!("{} read", format_size(self.bytes_read)),
        }
    }
}

/// Formats a byte count in decimal units with one decimal place.
///
/// Sizes below one terabyte are shown in gigabytes, everything else in
/// terabytes, which matches how drive vendors label capacity.
pub fn format_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes >= TB {
        format!("{:.1} TB", bytes / TB)
    } else {
        format!("{:.1} GB", bytes / GB)
    }
}
