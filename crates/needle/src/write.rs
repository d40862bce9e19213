//! Encoding a needle into its on-disk byte representation.

use byteorder::{BigEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;

use crate::format::{
    CHECKSUM_SIZE, MAX_DATA_SIZE, MAX_MIME_SIZE, MAX_NAME_SIZE, MAX_PAIRS_SIZE,
    NEEDLE_HEADER_SIZE, padding_after,
};
use crate::{Needle, NeedleError, Version};

impl Needle {
    /// Serializes this needle for `version`.
    ///
    /// The output length always equals [`Needle::disk_size`] for the same
    /// version (padding bytes are written as zero), so the caller can
    /// append the returned buffer verbatim at an 8-byte-aligned offset.
    ///
    /// # Errors
    ///
    /// [`NeedleError::InvalidField`] if the id is zero, the data exceeds
    /// [`MAX_DATA_SIZE`], or a present optional field exceeds its
    /// length-prefix limit (name ≤ 255, mime ≤ 255, pairs ≤ 65535).
    pub fn encode(&self, version: Version) -> Result<Vec<u8>, NeedleError> {
        if self.id == 0 {
            return Err(NeedleError::InvalidField {
                field: "id",
                reason: "zero is reserved".to_string(),
            });
        }
        if self.data.len() > MAX_DATA_SIZE {
            return Err(NeedleError::InvalidField {
                field: "data",
                reason: format!("{} bytes (max {})", self.data.len(), MAX_DATA_SIZE),
            });
        }
        if self.has_name() && self.name.len() > MAX_NAME_SIZE {
            return Err(field_too_large("name", self.name.len(), MAX_NAME_SIZE));
        }
        if self.has_mime() && self.mime.len() > MAX_MIME_SIZE {
            return Err(field_too_large("mime", self.mime.len(), MAX_MIME_SIZE));
        }
        if self.has_pairs() && self.pairs.len() > MAX_PAIRS_SIZE {
            return Err(field_too_large("pairs", self.pairs.len(), MAX_PAIRS_SIZE));
        }

        let disk_size = self.disk_size(version) as usize;
        let mut buf = Vec::with_capacity(disk_size);

        // header
        buf.write_u32::<BigEndian>(self.cookie)?;
        buf.write_u64::<BigEndian>(self.id)?;
        buf.write_u32::<BigEndian>(self.data.len() as u32)?;

        // body
        buf.extend_from_slice(&self.data);
        if version != Version::V1 {
            buf.write_u8(self.flags)?;
            if self.has_name() {
                buf.write_u8(self.name.len() as u8)?;
                buf.extend_from_slice(&self.name);
            }
            if self.has_mime() {
                buf.write_u8(self.mime.len() as u8)?;
                buf.extend_from_slice(&self.mime);
            }
            if self.has_last_modified() {
                buf.write_u64::<BigEndian>(self.last_modified)?;
            }
            if self.has_ttl() {
                buf.write_u16::<BigEndian>(self.ttl)?;
            }
            if self.has_pairs() {
                buf.write_u16::<BigEndian>(self.pairs.len() as u16)?;
                buf.extend_from_slice(&self.pairs);
            }
        }

        // trailer: CRC over the data bytes only, then zero padding
        let mut hasher = Crc32::new();
        hasher.update(&self.data);
        buf.write_u32::<BigEndian>(hasher.finalize())?;

        let unpadded = NEEDLE_HEADER_SIZE as u64
            + self.data.len() as u64
            + self.body_overhead(version)
            + CHECKSUM_SIZE as u64;
        buf.resize(buf.len() + padding_after(unpadded) as usize, 0);

        debug_assert_eq!(buf.len(), disk_size);
        Ok(buf)
    }
}

fn field_too_large(field: &'static str, len: usize, max: usize) -> NeedleError {
    NeedleError::InvalidField {
        field,
        reason: format!("{} bytes (max {})", len, max),
    }
}
