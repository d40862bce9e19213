//! Decoding needle records from a volume data file.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use tracing::trace;

use crate::format::{
    CHECKSUM_SIZE, MAX_DATA_SIZE, NEEDLE_HEADER_SIZE, padding_after,
};
use crate::{Needle, NeedleError, Version};

impl Needle {
    /// Reads one full record at `offset`, verifying the data checksum.
    ///
    /// Returns the decoded needle and the bytes consumed (its disk size,
    /// always a multiple of 8); the stream is positioned at the start of
    /// the next record.
    ///
    /// # Errors
    ///
    /// [`NeedleError::Corrupt`] on a short read, a checksum mismatch, or a
    /// flag-indicated field that does not fit the remaining body. The
    /// reported offset is the start of the failing record.
    pub fn read_at<R: Read + Seek>(
        r: &mut R,
        offset: u64,
        version: Version,
    ) -> Result<(Needle, u32), NeedleError> {
        r.seek(SeekFrom::Start(offset))?;
        read_record(r, offset, version, true)
    }

    /// Like [`Needle::read_at`], but seeks over the `data` and `pairs`
    /// bytes instead of loading them, and skips checksum verification
    /// (there is nothing to verify against). Name, mime, last-modified and
    /// ttl are still decoded. Used by scans that only need metadata.
    pub fn read_at_skip_body<R: Read + Seek>(
        r: &mut R,
        offset: u64,
        version: Version,
    ) -> Result<(Needle, u32), NeedleError> {
        r.seek(SeekFrom::Start(offset))?;
        read_record(r, offset, version, false)
    }
}

fn read_record<R: Read + Seek>(
    r: &mut R,
    offset: u64,
    version: Version,
    read_body: bool,
) -> Result<(Needle, u32), NeedleError> {
    let mut needle = Needle::default();

    let mut header = [0u8; NEEDLE_HEADER_SIZE];
    read_exact_at(r, &mut header, offset)?;
    let mut h = &header[..];
    needle.cookie = h.read_u32::<BigEndian>()?;
    needle.id = h.read_u64::<BigEndian>()?;
    needle.size = h.read_u32::<BigEndian>()?;
    let size = needle.size as usize;

    if size > MAX_DATA_SIZE {
        return Err(corrupt(
            offset,
            format!("data size {} exceeds maximum {}", size, MAX_DATA_SIZE),
        ));
    }

    // unpadded bytes consumed so far; padding is derived from the total at
    // the end, from parsed lengths rather than from the needle fields
    let mut unpadded = (NEEDLE_HEADER_SIZE + size) as u64;

    if read_body {
        needle.data = vec![0u8; size];
        read_exact_at(r, &mut needle.data, offset)?;
    } else {
        r.seek(SeekFrom::Current(size as i64))?;
    }

    if version != Version::V1 {
        needle.flags = read_u8_at(r, offset)?;
        unpadded += 1;
        if needle.has_name() {
            let n = read_u8_at(r, offset)? as usize;
            needle.name = vec![0u8; n];
            read_exact_at(r, &mut needle.name, offset)?;
            unpadded += 1 + n as u64;
        }
        if needle.has_mime() {
            let n = read_u8_at(r, offset)? as usize;
            needle.mime = vec![0u8; n];
            read_exact_at(r, &mut needle.mime, offset)?;
            unpadded += 1 + n as u64;
        }
        if needle.has_last_modified() {
            let mut buf = [0u8; 8];
            read_exact_at(r, &mut buf, offset)?;
            needle.last_modified = u64::from_be_bytes(buf);
            unpadded += 8;
        }
        if needle.has_ttl() {
            let mut buf = [0u8; 2];
            read_exact_at(r, &mut buf, offset)?;
            needle.ttl = u16::from_be_bytes(buf);
            unpadded += 2;
        }
        if needle.has_pairs() {
            let mut buf = [0u8; 2];
            read_exact_at(r, &mut buf, offset)?;
            let n = u16::from_be_bytes(buf) as usize;
            if read_body {
                needle.pairs = vec![0u8; n];
                read_exact_at(r, &mut needle.pairs, offset)?;
            } else {
                r.seek(SeekFrom::Current(n as i64))?;
            }
            unpadded += 2 + n as u64;
        }
    }

    let mut crc_buf = [0u8; CHECKSUM_SIZE];
    read_exact_at(r, &mut crc_buf, offset)?;
    let stored_crc = u32::from_be_bytes(crc_buf);
    unpadded += CHECKSUM_SIZE as u64;

    if read_body {
        let mut hasher = Crc32::new();
        hasher.update(&needle.data);
        let actual = hasher.finalize();
        if actual != stored_crc {
            return Err(corrupt(
                offset,
                format!(
                    "checksum mismatch: stored {:#010x}, computed {:#010x}",
                    stored_crc, actual
                ),
            ));
        }
    }

    // consume padding; its contents are ignored
    let pad = padding_after(unpadded);
    if pad > 0 {
        let mut scratch = [0u8; 8];
        read_exact_at(r, &mut scratch[..pad as usize], offset)?;
    }

    let disk_size = unpadded + pad;
    trace!(
        id = needle.id,
        offset,
        size,
        disk_size,
        "decoded needle record"
    );
    Ok((needle, disk_size as u32))
}

fn corrupt(offset: u64, reason: String) -> NeedleError {
    NeedleError::Corrupt { offset, reason }
}

/// `read_exact` with short reads reported as corruption at the record's
/// start offset rather than a bare I/O error.
fn read_exact_at<R: Read>(r: &mut R, buf: &mut [u8], offset: u64) -> Result<(), NeedleError> {
    r.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            corrupt(offset, "truncated record".to_string())
        } else {
            NeedleError::Io(e)
        }
    })
}

fn read_u8_at<R: Read>(r: &mut R, offset: u64) -> Result<u8, NeedleError> {
    let mut b = [0u8; 1];
    read_exact_at(r, &mut b, offset)?;
    Ok(b[0])
}
