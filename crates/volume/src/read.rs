//! Read path: map lookup, then a decode at the recorded offset.

use needle::{FileId, Needle, NeedleId};
use needlemap::NeedleMap;

use crate::{Volume, VolumeError, reader_poisoned};

impl Volume {
    /// Reads the live needle for `id`, verifying its checksum.
    ///
    /// # Errors
    ///
    /// * [`VolumeError::NotFound`] if the id is absent or tombstoned.
    /// * [`VolumeError::Corrupt`] if the record fails to decode or the
    ///   decoded id disagrees with the map (a stale or damaged index).
    pub fn read_needle(&self, id: NeedleId) -> Result<Needle, VolumeError> {
        let value = self
            .map
            .get(id)
            .ok_or_else(|| VolumeError::NotFound(format!("needle {}", id)))?;
        let offset = value.byte_offset();

        let mut reader = self.dat_reader.lock().map_err(|_| reader_poisoned())?;
        let (needle, disk_size) =
            Needle::read_at(&mut *reader, offset, self.superblock.version)?;

        if needle.id != id {
            return Err(VolumeError::Corrupt {
                last_good_offset: offset,
                reason: format!("index points id {} at a record holding id {}", id, needle.id),
            });
        }
        debug_assert_eq!(disk_size, value.size);
        Ok(needle)
    }

    /// The external identifier for a live needle; the cookie comes from
    /// the stored record.
    pub fn file_id(&self, id: NeedleId) -> Result<FileId, VolumeError> {
        let needle = self.read_needle(id)?;
        Ok(FileId::new(self.id, needle.id, needle.cookie))
    }
}
