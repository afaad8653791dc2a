//! Free-space probing for the output folder.

use std::path::Path;

/// Reports how much space is free at a path, so a frontend can warn
/// before a large export. Platform-specific probes implement this;
/// tests substitute a fixed value.
pub trait DiskSpaceProbe: Send + Sync {
    fn available_bytes(&self, path: &Path) -> std::io::Result<u64>;
}

impl<F> DiskSpaceProbe for F
where
    F: Fn(&Path) -> std::io::Result<u64> + Send + Sync,
{
    fn available_bytes(&self, path: &Path) -> std::io::Result<u64> {
        self(path)
    }
}

/// Formats a byte count the way frontends display free space.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
