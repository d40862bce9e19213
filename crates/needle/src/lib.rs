//! # Needle - On-Disk Blob Record Format
//!
//! The wire format for a single blob record ("needle") inside a volume data
//! file. Needles are *append-only*: once written they are never modified,
//! only superseded by a later append or tombstoned in the index.
//!
//! ## Record layout (v2/v3, current)
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ HEADER (16 bytes)                                             │
//! │                                                               │
//! │ cookie (u32) | id (u64) | size (u32)                          │
//! │                                                               │
//! │ `size` is the raw data length; the total body length is       │
//! │ derived from `size` plus the flag byte.                       │
//! ├───────────────────────────────────────────────────────────────┤
//! │ BODY                                                          │
//! │                                                               │
//! │ data (size bytes) | flags (u8)                                │
//! │ [name_size (u8)  | name]          if HAS_NAME                 │
//! │ [mime_size (u8)  | mime]          if HAS_MIME                 │
//! │ [last_modified (u64)]             if HAS_LAST_MODIFIED        │
//! │ [ttl (u16)]                       if HAS_TTL                  │
//! │ [pairs_size (u16) | pairs]        if HAS_PAIRS                │
//! ├───────────────────────────────────────────────────────────────┤
//! │ TRAILER                                                       │
//! │                                                               │
//! │ checksum (u32, CRC-32 over data only) | padding to 8 bytes    │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. Every record starts and ends on an 8-byte
//! boundary, so the total on-disk footprint ([`Needle::disk_size`]) is
//! always a multiple of 8.
//!
//! ## Version history
//!
//! | Version | Layout                                               |
//! |---------|------------------------------------------------------|
//! | v1      | Header + data + checksum; no flags, no optional fields |
//! | v2      | Flag byte + optional name/mime/mtime/ttl/pairs        |
//! | v3      | Same record layout as v2                              |
//!
//! The volume superblock pins one version for every needle in that volume;
//! mixing versions within a volume is forbidden.

use std::io;

use thiserror::Error;

mod file_id;
mod format;
mod read;
mod write;

pub use file_id::FileId;
pub use format::{
    CHECKSUM_SIZE, FLAG_CHUNK_MANIFEST, FLAG_GZIPPED, FLAG_HAS_LAST_MODIFIED, FLAG_HAS_MIME,
    FLAG_HAS_NAME, FLAG_HAS_PAIRS, FLAG_HAS_TTL, MAX_DATA_SIZE, MAX_MIME_SIZE, MAX_NAME_SIZE,
    MAX_PAIRS_SIZE, NEEDLE_HEADER_SIZE, NEEDLE_PADDING, aligned_size,
};

/// Identifier of a needle within a volume. Zero is reserved and never a
/// valid key.
pub type NeedleId = u64;

/// Opaque per-object token embedded in the external [`FileId`]. The engine
/// stores and returns it but never uses it for lookup.
pub type Cookie = u32;

/// Identifier of a volume on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VolumeId(pub u32);

impl std::fmt::Display for VolumeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for VolumeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>().map(VolumeId)
    }
}

/// Record layout version. The superblock pins one version for the whole
/// volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V1,
    V2,
    V3,
}

impl Version {
    /// The byte stored in the superblock.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Version::V1 => 1,
            Version::V2 => 2,
            Version::V3 => 3,
        }
    }
}

impl TryFrom<u8> for Version {
    type Error = u8;

    fn try_from(b: u8) -> Result<Self, u8> {
        match b {
            1 => Ok(Version::V1),
            2 => Ok(Version::V2),
            3 => Ok(Version::V3),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Errors that can occur while encoding or decoding a needle record.
#[derive(Debug, Error)]
pub enum NeedleError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The record at `offset` could not be decoded: short read, checksum
    /// mismatch, or a flag-indicated field that does not fit the body.
    #[error("corrupt needle record at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    /// An encode-time violation of a field constraint.
    #[error("invalid needle field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// One logical blob record.
///
/// Optional fields are paired with bits in [`Needle::flags`]; use the
/// setters ([`Needle::set_name`] etc.) to keep the two in sync. A field
/// whose flag bit is clear is not written to disk and its in-memory value
/// is empty/zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Needle {
    pub cookie: Cookie,
    pub id: NeedleId,
    /// Raw data length as recorded in the header's `size` field. Kept on
    /// the struct so metadata-only decodes still know the payload length;
    /// the encoder always writes `data.len()` regardless.
    pub size: u32,
    pub data: Vec<u8>,
    pub flags: u8,
    pub name: Vec<u8>,
    pub mime: Vec<u8>,
    pub last_modified: u64,
    pub ttl: u16,
    pub pairs: Vec<u8>,
}

impl Needle {
    /// Creates a bare needle holding only `data`.
    #[must_use]
    pub fn new(id: NeedleId, cookie: Cookie, data: Vec<u8>) -> Self {
        Needle {
            cookie,
            id,
            size: data.len() as u32,
            data,
            ..Needle::default()
        }
    }

    #[must_use]
    pub fn is_gzipped(&self) -> bool {
        self.flags & FLAG_GZIPPED != 0
    }

    #[must_use]
    pub fn has_name(&self) -> bool {
        self.flags & FLAG_HAS_NAME != 0
    }

    #[must_use]
    pub fn has_mime(&self) -> bool {
        self.flags & FLAG_HAS_MIME != 0
    }

    #[must_use]
    pub fn has_last_modified(&self) -> bool {
        self.flags & FLAG_HAS_LAST_MODIFIED != 0
    }

    #[must_use]
    pub fn has_ttl(&self) -> bool {
        self.flags & FLAG_HAS_TTL != 0
    }

    #[must_use]
    pub fn has_pairs(&self) -> bool {
        self.flags & FLAG_HAS_PAIRS != 0
    }

    #[must_use]
    pub fn is_chunk_manifest(&self) -> bool {
        self.flags & FLAG_CHUNK_MANIFEST != 0
    }

    pub fn set_gzipped(&mut self) {
        self.flags |= FLAG_GZIPPED;
    }

    pub fn set_name(&mut self, name: Vec<u8>) {
        self.flags |= FLAG_HAS_NAME;
        self.name = name;
    }

    pub fn set_mime(&mut self, mime: Vec<u8>) {
        self.flags |= FLAG_HAS_MIME;
        self.mime = mime;
    }

    pub fn set_last_modified(&mut self, unix_seconds: u64) {
        self.flags |= FLAG_HAS_LAST_MODIFIED;
        self.last_modified = unix_seconds;
    }

    pub fn set_ttl(&mut self, ttl: u16) {
        self.flags |= FLAG_HAS_TTL;
        self.ttl = ttl;
    }

    pub fn set_pairs(&mut self, pairs: Vec<u8>) {
        self.flags |= FLAG_HAS_PAIRS;
        self.pairs = pairs;
    }

    pub fn set_chunk_manifest(&mut self) {
        self.flags |= FLAG_CHUNK_MANIFEST;
    }

    /// Total bytes this needle occupies on disk for `version`: header, body
    /// (all present optional fields), checksum, and padding to the next
    /// 8-byte boundary. Always a multiple of 8.
    #[must_use]
    pub fn disk_size(&self, version: Version) -> u32 {
        let unpadded = NEEDLE_HEADER_SIZE as u64
            + self.data.len() as u64
            + self.body_overhead(version)
            + CHECKSUM_SIZE as u64;
        aligned_size(unpadded) as u32
    }

    /// Bytes the body occupies beyond the raw data: the flag byte plus
    /// every present optional field. Zero for v1.
    pub(crate) fn body_overhead(&self, version: Version) -> u64 {
        if version == Version::V1 {
            return 0;
        }
        let mut n = 1u64; // flags
        if self.has_name() {
            n += 1 + self.name.len() as u64;
        }
        if self.has_mime() {
            n += 1 + self.mime.len() as u64;
        }
        if self.has_last_modified() {
            n += 8;
        }
        if self.has_ttl() {
            n += 2;
        }
        if self.has_pairs() {
            n += 2 + self.pairs.len() as u64;
        }
        n
    }
}

#[cfg(test)]
mod tests;
