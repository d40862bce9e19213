//! Compaction primitives: copy the live set into a fresh volume and swap
//! it over the original.
//!
//! There is no scheduler here; deciding *when* a volume is worth
//! compacting (its `deleted_bytes` ratio) belongs to the hosting process.

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use index::IndexReader;
use needle::VolumeId;
use needlemap::{NeedleMap, NeedleMapKind, load_needle_map};

use crate::{
    ScanNext, ScanOptions, Superblock, Volume, VolumeError, dat_path, idx_path,
    scan_volume_file, volume_file_name,
};

/// What a compaction pass achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactOutcome {
    /// Live needles carried over.
    pub copied: u64,
    /// Data-file bytes the swap reclaimed.
    pub reclaimed_bytes: u64,
}

/// Scans the volume `<collection>_<id>` and appends every **live** needle
/// to `dst`, in physical order.
///
/// Liveness is decided by the source volume's on-disk index: a scanned
/// record survives only if the replayed map holds its id at exactly the
/// scanned offset with a nonzero size. Records superseded by a later
/// append, and records whose tombstone is in the index, are left behind.
///
/// Returns the number of needles copied.
pub fn copy_live_needles(
    dir: &Path,
    collection: &str,
    id: VolumeId,
    kind: NeedleMapKind,
    dst: &mut Volume,
) -> Result<u64, VolumeError> {
    let idx_file = idx_path(dir, collection, id);
    if !idx_file.exists() {
        return Err(VolumeError::NotFound(format!(
            "volume index file {}",
            idx_file.display()
        )));
    }
    let mut map = kind.new_map();
    let mut idx_reader = IndexReader::open(&idx_file)?;
    load_needle_map(&mut idx_reader, map.as_mut())?;

    let opts = ScanOptions {
        read_needle_body: true,
        cancel: None,
    };
    let mut copied = 0u64;
    scan_volume_file(
        dir,
        collection,
        id,
        &opts,
        |_| Ok(()),
        |needle, offset| {
            let live = map
                .get(needle.id)
                .is_some_and(|v| v.size > 0 && v.byte_offset() == offset);
            if live {
                dst.append_needle(needle)?;
                copied += 1;
            } else {
                debug!(id = needle.id, offset, "skipping dead needle");
            }
            Ok(ScanNext::Continue)
        },
    )?;
    Ok(copied)
}

/// Rewrites a volume in place, dropping everything the index considers
/// dead.
///
/// The live set is copied into `<name>.cpd`/`<name>.cpx` beside the
/// originals, flushed, and then renamed over them. The two renames are
/// the commit point; a crash between them leaves a mismatched pair that
/// [`crate::rebuild_index`] repairs.
pub fn compact_volume(
    dir: &Path,
    collection: &str,
    id: VolumeId,
    kind: NeedleMapKind,
) -> Result<CompactOutcome, VolumeError> {
    let name = volume_file_name(collection, id);
    let src_dat = dat_path(dir, collection, id);
    let src_idx = idx_path(dir, collection, id);
    let cpd = dir.join(format!("{}.cpd", name));
    let cpx = dir.join(format!("{}.cpx", name));

    // leftovers from an interrupted pass
    if cpd.exists() {
        fs::remove_file(&cpd)?;
    }
    if cpx.exists() {
        fs::remove_file(&cpx)?;
    }

    let superblock = {
        let mut f = fs::File::open(&src_dat).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VolumeError::NotFound(format!("volume data file {}", src_dat.display()))
            } else {
                VolumeError::Io(e)
            }
        })?;
        Superblock::read_from(&mut f)?
    };

    let src_len = fs::metadata(&src_dat)?.len();
    let mut dst = Volume::create_files(&cpd, &cpx, dir, collection, id, superblock, false)?;
    let copied = copy_live_needles(dir, collection, id, kind, &mut dst)?;
    dst.flush()?;
    let dst_len = dst.data_size();
    drop(dst);

    fs::rename(&cpd, &src_dat)?;
    fs::rename(&cpx, &src_idx)?;

    let outcome = CompactOutcome {
        copied,
        reclaimed_bytes: src_len.saturating_sub(dst_len),
    };
    info!(
        volume = %id,
        copied = outcome.copied,
        reclaimed = outcome.reclaimed_bytes,
        "compacted volume"
    );
    Ok(outcome)
}
