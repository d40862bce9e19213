//! Layout constants shared by the encoder, the decoder, and the volume
//! layer's offset arithmetic.

/// Bytes in the fixed record header: `cookie(4) | id(8) | size(4)`.
pub const NEEDLE_HEADER_SIZE: usize = 16;

/// Bytes in the trailing CRC-32 checksum.
pub const CHECKSUM_SIZE: usize = 4;

/// Records are padded so that every header offset is a multiple of this.
pub const NEEDLE_PADDING: u64 = 8;

/// The data is stored gzip-compressed. The engine never inflates; the flag
/// is carried for the caller.
pub const FLAG_GZIPPED: u8 = 0x01;
pub const FLAG_HAS_NAME: u8 = 0x02;
pub const FLAG_HAS_MIME: u8 = 0x04;
pub const FLAG_HAS_LAST_MODIFIED: u8 = 0x08;
pub const FLAG_HAS_TTL: u8 = 0x10;
pub const FLAG_HAS_PAIRS: u8 = 0x20;
/// The data is a manifest listing the chunks of a larger object.
pub const FLAG_CHUNK_MANIFEST: u8 = 0x80;

/// `name` is length-prefixed by a single byte.
pub const MAX_NAME_SIZE: usize = u8::MAX as usize;
/// `mime` is length-prefixed by a single byte.
pub const MAX_MIME_SIZE: usize = u8::MAX as usize;
/// `pairs` is length-prefixed by two bytes.
pub const MAX_PAIRS_SIZE: usize = u16::MAX as usize;

/// Maximum data bytes the decoder will allocate for one record (256 MiB).
/// Prevents OOM when a corrupt header carries an absurd size.
pub const MAX_DATA_SIZE: usize = 256 * 1024 * 1024;

/// Rounds `n` up to the next multiple of [`NEEDLE_PADDING`].
#[must_use]
pub fn aligned_size(n: u64) -> u64 {
    n.div_ceil(NEEDLE_PADDING) * NEEDLE_PADDING
}

/// Padding bytes needed after `n` to reach the next 8-byte boundary.
#[must_use]
pub fn padding_after(n: u64) -> u64 {
    aligned_size(n) - n
}
