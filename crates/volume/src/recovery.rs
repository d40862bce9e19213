//! Cold-start repair: re-indexing orphaned records and rebuilding a lost
//! index file from the data file.

use std::cell::Cell;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use index::{IndexEntry, IndexWriter};
use needle::{Needle, NeedleError, Version, VolumeId};
use needlemap::{NeedleMap, NeedleValue};

use crate::{
    ScanNext, ScanOptions, Volume, VolumeError, idx_path, reader_poisoned, scan_volume_file,
};

impl Volume {
    /// Scans the data-file tail starting at `from` (one past the last
    /// indexed byte) and re-indexes every complete record found there; a
    /// crash between the data flush and the index append leaves exactly
    /// such orphans. A torn record at EOF is truncated away, the way a
    /// log reader discards a partial tail.
    pub(crate) fn recover_tail(&mut self, from: u64) -> Result<(), VolumeError> {
        let mut offset = from;
        if offset >= self.dat_len {
            return Ok(());
        }
        warn!(
            volume = %self.id,
            from,
            data_len = self.dat_len,
            "data file extends past the index; re-indexing tail"
        );

        let version = self.superblock.version;
        let mut recovered = 0u64;
        while offset < self.dat_len {
            let decoded = {
                let mut reader = self.dat_reader.lock().map_err(|_| reader_poisoned())?;
                Needle::read_at(&mut *reader, offset, version)
            };
            match decoded {
                Ok((needle, disk_size)) => {
                    let entry = IndexEntry {
                        id: needle.id,
                        offset_units: (offset / 8) as u32,
                        size: disk_size,
                    };
                    self.idx.append(&entry)?;
                    self.map.set(
                        needle.id,
                        NeedleValue {
                            offset_units: entry.offset_units,
                            size: disk_size,
                        },
                    );
                    offset += u64::from(disk_size);
                    recovered += 1;
                }
                Err(NeedleError::Io(e)) => return Err(VolumeError::Io(e)),
                Err(e) => {
                    warn!(
                        volume = %self.id,
                        offset,
                        error = %e,
                        "torn record at data-file tail; truncating"
                    );
                    self.dat.set_len(offset)?;
                    self.dat.sync_all()?;
                    self.dat_len = offset;
                    break;
                }
            }
        }

        if recovered > 0 {
            self.idx.sync_to_disk()?;
            debug!(volume = %self.id, recovered, "re-indexed orphan records");
        }
        Ok(())
    }
}

/// Rebuilds `<name>.idx` from the physical contents of `<name>.dat`.
///
/// Every record present in the data file gets one entry, in file order, so
/// later duplicates win exactly as a replay would decide. Deletions that
/// existed only in the old index are lost; a rebuilt index reflects
/// physical state only. The new file is written beside the old one and
/// swapped in by rename.
///
/// Bodies are read in full so every indexed record has a verified
/// checksum.
///
/// Returns the number of records indexed.
pub fn rebuild_index(dir: &Path, collection: &str, id: VolumeId) -> Result<u64, VolumeError> {
    let final_path = idx_path(dir, collection, id);
    let tmp_path = final_path.with_extension("idx.tmp");
    if tmp_path.exists() {
        fs::remove_file(&tmp_path)?;
    }

    let opts = ScanOptions {
        read_needle_body: true,
        cancel: None,
    };
    let mut writer = IndexWriter::create(&tmp_path, false)?;
    let version = Cell::new(Version::V1);
    let mut count = 0u64;
    let result = scan_volume_file(
        dir,
        collection,
        id,
        &opts,
        |sb| {
            version.set(sb.version);
            Ok(())
        },
        |needle, offset| {
            writer.append(&IndexEntry {
                id: needle.id,
                offset_units: (offset / 8) as u32,
                size: needle.disk_size(version.get()),
            })?;
            count += 1;
            Ok(ScanNext::Continue)
        },
    );
    if let Err(e) = result {
        drop(writer);
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    writer.sync_to_disk()?;
    drop(writer);
    fs::rename(&tmp_path, &final_path)?;
    debug!(volume = %id, count, "rebuilt index from data file");
    Ok(count)
}
