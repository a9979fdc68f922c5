//! Device-side helpers: where sidecars live and which drivers are known to
//! work.

use serde::{Deserialize, Serialize};

/// Drivers whose book paths are known to point at readable sidecars.
pub const SUPPORTED_DRIVERS: &[&str] = &[
    "FOLDER_DEVICE",
    "KINDLE2",
    "KOBO",
    "KOBOTOUCH",
    "KOBOTOUCHEXTENDED",
    "POCKETBOOK626",
    "POCKETBOOK622",
    "POCKETBOOK360",
    "POCKETBOOK301",
    "POCKETBOOK602",
    "SMART_DEVICE_APP",
    "TOLINO",
    "USER_DEFINED",
];

/// Drivers that cannot expose sidecars.
pub const UNSUPPORTED_DRIVERS: &[&str] = &["MTP_DEVICE"];

/// Path of the sidecar that belongs to a book on the device.
///
/// `dir/Book.epub` maps to `dir/Book.sdr/metadata.epub.lua`. A file name
/// without an extension maps to `<path>.sdr/metadata.lua`.
pub fn sidecar_path(book_path: &str) -> String {
    let name_start = book_path.rfind(['/', '\\']).map_or(0, |i| i + 1);
    let name = &book_path[name_start..];

    match name.rfind('.') {
        Some(dot) if dot > 0 && is_extension(&name[dot + 1..]) => {
            let stem = &book_path[..name_start + dot];
            format!("{}.sdr/metadata.{}.lua", stem, &name[dot + 1..])
        }
        _ => format!("{}.sdr/metadata.lua", book_path),
    }
}

fn is_extension(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// How well a device driver is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceSupport {
    Supported,
    /// Sync is refused
    Unsupported,
    /// Not known to work; sync is attempted anyway
    Untested,
}

impl DeviceSupport {
    /// Classify a driver by its class name.
    pub fn classify(driver: &str) -> Self {
        if UNSUPPORTED_DRIVERS.contains(&driver) {
            DeviceSupport::Unsupported
        } else if SUPPORTED_DRIVERS.contains(&driver) {
            DeviceSupport::Supported
        } else {
            DeviceSupport::Untested
        }
    }

    /// Whether a sync should go ahead.
    pub fn allows_sync(&self) -> bool {
        !matches!(self, DeviceSupport::Unsupported)
    }
}
