//! Write path: `append_needle()`, `append_raw()`, `delete_needle()`.
//!
//! All mutations flow through this module and keep one ordering: data
//! bytes first, data flush, then the index entry, then the map. An I/O
//! failure anywhere leaves the map untouched, so the worst a crash can do
//! is strand bytes in the data-file tail for open-time recovery to find.

use std::io::Write;

use byteorder::{BigEndian, ByteOrder};
use tracing::trace;

use index::IndexEntry;
use needle::{Needle, NEEDLE_HEADER_SIZE, NeedleId, Version};
use needlemap::{NeedleMap, NeedleValue};

use crate::{Volume, VolumeError};

/// Largest header offset the index's u32 offset-units field can address.
const MAX_APPEND_OFFSET: u64 = (u32::MAX as u64) * 8;

impl Volume {
    /// Appends one needle at the end of the data file.
    ///
    /// Returns the byte offset of the record's header (always a multiple
    /// of 8) and its on-disk size. With `sync` enabled the record is
    /// durable, and indexed, before this returns.
    ///
    /// # Errors
    ///
    /// * [`VolumeError::VolumeFull`] if the header offset would overflow
    ///   the index's offset-units field (the 32 GiB cap).
    /// * [`needle::NeedleError::InvalidField`] for a zero id or an
    ///   oversized optional field.
    /// * [`VolumeError::Io`] if the underlying write fails; the needle
    ///   map is left unchanged.
    pub fn append_needle(&mut self, n: &Needle) -> Result<(u64, u32), VolumeError> {
        let bytes = n.encode(self.superblock.version)?;
        self.append_record(n.id, &bytes)
    }

    /// Appends an already-encoded record, e.g. one received from a
    /// replica. The bytes must have been produced by [`Needle::encode`]
    /// for `version`.
    ///
    /// # Errors
    ///
    /// [`VolumeError::VersionMismatch`] if `version` differs from the
    /// volume's pinned version; [`VolumeError::Corrupt`] if the buffer is
    /// too short or misaligned to be a record.
    pub fn append_raw(
        &mut self,
        version: Version,
        bytes: &[u8],
    ) -> Result<(u64, u32), VolumeError> {
        if version != self.superblock.version {
            return Err(VolumeError::VersionMismatch {
                given: version,
                pinned: self.superblock.version,
            });
        }
        if bytes.len() < NEEDLE_HEADER_SIZE || bytes.len() % 8 != 0 {
            return Err(VolumeError::Corrupt {
                last_good_offset: self.dat_len,
                reason: format!("raw record length {} is not a padded record", bytes.len()),
            });
        }
        let id = BigEndian::read_u64(&bytes[4..12]);
        if id == 0 {
            return Err(VolumeError::Corrupt {
                last_good_offset: self.dat_len,
                reason: "raw record carries reserved id 0".to_string(),
            });
        }
        self.append_record(id, bytes)
    }

    fn append_record(&mut self, id: NeedleId, bytes: &[u8]) -> Result<(u64, u32), VolumeError> {
        let offset = self.dat_len;
        if offset > MAX_APPEND_OFFSET {
            return Err(VolumeError::VolumeFull);
        }
        debug_assert_eq!(offset % 8, 0);
        let disk_size = bytes.len() as u32;

        self.dat.write_all(bytes)?;
        if self.sync {
            self.dat.sync_all()?;
        }

        let entry = IndexEntry {
            id,
            offset_units: (offset / 8) as u32,
            size: disk_size,
        };
        self.idx.append(&entry)?;
        if self.sync {
            self.idx.sync_to_disk()?;
        }

        self.map.set(
            id,
            NeedleValue {
                offset_units: entry.offset_units,
                size: disk_size,
            },
        );
        self.dat_len = offset + u64::from(disk_size);

        trace!(volume = %self.id, id, offset, disk_size, "appended needle");
        Ok((offset, disk_size))
    }

    /// Logically deletes `id`: appends a size-zero tombstone to the index
    /// and drops the map entry. The data file is not touched; the bytes
    /// are reclaimed by compaction.
    ///
    /// Returns the disk size the deletion made reclaimable.
    ///
    /// # Errors
    ///
    /// [`VolumeError::NotFound`] if the id is not live.
    pub fn delete_needle(&mut self, id: NeedleId) -> Result<u32, VolumeError> {
        let value = self
            .map
            .get(id)
            .ok_or_else(|| VolumeError::NotFound(format!("needle {}", id)))?;

        self.idx.append(&IndexEntry::tombstone(id))?;
        if self.sync {
            self.idx.sync_to_disk()?;
        }
        self.map.delete(id);

        trace!(volume = %self.id, id, reclaimable = value.size, "deleted needle");
        Ok(value.size)
    }
}

#[cfg(test)]
mod tests {
    use super::MAX_APPEND_OFFSET;

    #[test]
    fn cap_is_thirty_two_gib() {
        assert_eq!(MAX_APPEND_OFFSET, 32 * 1024 * 1024 * 1024 - 8);
    }
}
