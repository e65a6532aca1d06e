//! Locate the squashfs root image on the initramfs.

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use tracing::{debug, info, warn};

/// `hsqs` read as a little-endian u32.
pub const SQUASHFS_MAGIC: u32 = 0x7371_7368;

/// Return the name of the first regular file in `root_dir` that starts with
/// the squashfs magic.
///
/// Unreadable candidates are logged and skipped. When several files match,
/// the one the filesystem enumerates first wins; directory order is not
/// stable, so an initramfs should carry exactly one image.
pub fn find_image(root_dir: &Path) -> Option<OsString> {
    let entries = match std::fs::read_dir(root_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %root_dir.display(), error = %e, "cannot open image directory");
            return None;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %root_dir.display(), error = %e, "directory read failed");
                continue;
            }
        };
        let is_file = entry.file_type().is_ok_and(|t| t.is_file());
        if !is_file {
            continue;
        }

        let path = entry.path();
        match has_squashfs_magic(&path) {
            Ok(true) => {
                info!(image = %path.display(), "found squashfs image");
                return Some(entry.file_name());
            }
            Ok(false) => debug!(file = %path.display(), "not a squashfs image"),
            Err(e) => warn!(file = %path.display(), error = %e, "cannot read candidate image"),
        }
    }
    None
}

fn has_squashfs_magic(path: &Path) -> io::Result<bool> {
    let mut magic = [0u8; 4];
    File::open(path)?.read_exact(&mut magic)?;
    Ok(u32::from_le_bytes(magic) == SQUASHFS_MAGIC)
}
