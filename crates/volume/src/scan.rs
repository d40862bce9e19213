//! File-order traversal of a volume data file.
//!
//! The scanner is stateless across needles: it opens the `.dat` file
//! directly, never the index, and hands each decoded record to a callback
//! together with its header offset. Export, repair, and compaction are
//! all built on it; the callback cross-checks the needle map to decide
//! which records are live.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use needle::{Needle, NeedleError, VolumeId};

use crate::{SUPERBLOCK_SIZE, Superblock, VolumeError, dat_path};

/// Callback verdict after each needle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanNext {
    Continue,
    /// End the scan cleanly after this needle.
    Stop,
}

/// Knobs for one scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Load `data` (and `pairs`) and verify checksums. When `false` the
    /// scanner seeks over payloads, decoding only headers and small
    /// metadata, so memory cost stays flat no matter how large the blobs.
    pub read_needle_body: bool,
    /// Checked between needles; setting it ends the scan cleanly. An
    /// in-flight record decode is never interrupted.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl ScanOptions {
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }
}

/// Walks `<collection>_<id>.dat` by physical offset.
///
/// The superblock callback runs first and pins the record version for the
/// rest of the scan. Each decoded needle is then handed to `on_needle`
/// with its header offset (always a multiple of 8), in file order.
///
/// # Termination
///
/// * EOF exactly on a record boundary -> `Ok(())`.
/// * [`ScanNext::Stop`] from the callback, or the cancel flag -> `Ok(())`.
/// * Any undecodable record -> [`VolumeError::Corrupt`] whose
///   `last_good_offset` is that record's start; records before it were
///   already delivered and remain trustworthy, nothing after it can be.
/// * A callback error aborts the scan unchanged.
pub fn scan_volume_file<SB, NF>(
    dir: &Path,
    collection: &str,
    id: VolumeId,
    opts: &ScanOptions,
    mut on_superblock: SB,
    mut on_needle: NF,
) -> Result<(), VolumeError>
where
    SB: FnMut(&Superblock) -> Result<(), VolumeError>,
    NF: FnMut(&Needle, u64) -> Result<ScanNext, VolumeError>,
{
    let path = dat_path(dir, collection, id);
    if !path.exists() {
        return Err(VolumeError::NotFound(format!(
            "volume data file {}",
            path.display()
        )));
    }
    let file = File::open(&path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let superblock = Superblock::read_from(&mut reader)?;
    on_superblock(&superblock)?;
    let version = superblock.version;

    let mut offset = SUPERBLOCK_SIZE as u64;
    while offset < file_len {
        if opts.cancelled() {
            debug!(volume = %id, offset, "scan cancelled");
            return Ok(());
        }

        let decoded = if opts.read_needle_body {
            Needle::read_at(&mut reader, offset, version)
        } else {
            Needle::read_at_skip_body(&mut reader, offset, version)
        };
        let (needle, disk_size) = match decoded {
            Ok(ok) => ok,
            Err(NeedleError::Io(e)) => return Err(VolumeError::Io(e)),
            Err(e) => {
                return Err(VolumeError::Corrupt {
                    last_good_offset: offset,
                    reason: e.to_string(),
                });
            }
        };

        if on_needle(&needle, offset)? == ScanNext::Stop {
            debug!(volume = %id, offset, "scan stopped by callback");
            return Ok(());
        }
        offset += u64::from(disk_size);
    }

    debug!(volume = %id, scanned_to = offset, "scan complete");
    Ok(())
}
