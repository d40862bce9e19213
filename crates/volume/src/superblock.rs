//! The 8-byte block at the start of every volume data file.

use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder};

use needle::Version;

use crate::VolumeError;

/// Superblock length on disk.
pub const SUPERBLOCK_SIZE: usize = 8;

/// Written once when the volume is created, never mutated afterwards.
///
/// Layout: `version(1) | replica_placement(1) | ttl(2 BE) | reserved(4)`.
/// The replica placement and TTL bytes are opaque to the engine; they are
/// carried for the cluster layer that owns their meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub version: Version,
    pub replica_placement: u8,
    pub ttl: u16,
}

impl Superblock {
    #[must_use]
    pub fn new(version: Version, replica_placement: u8, ttl: u16) -> Self {
        Superblock {
            version,
            replica_placement,
            ttl,
        }
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; SUPERBLOCK_SIZE] {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        buf[0] = self.version.as_u8();
        buf[1] = self.replica_placement;
        BigEndian::write_u16(&mut buf[2..4], self.ttl);
        buf
    }

    /// Parses a superblock, rejecting unknown version bytes.
    pub fn from_bytes(buf: &[u8; SUPERBLOCK_SIZE]) -> Result<Self, VolumeError> {
        let version = Version::try_from(buf[0]).map_err(|b| VolumeError::Corrupt {
            last_good_offset: 0,
            reason: format!("unknown volume version {}", b),
        })?;
        Ok(Superblock {
            version,
            replica_placement: buf[1],
            ttl: BigEndian::read_u16(&buf[2..4]),
        })
    }

    pub(crate) fn write_to<W: Write>(self, w: &mut W) -> Result<(), VolumeError> {
        w.write_all(&self.to_bytes())?;
        Ok(())
    }

    pub(crate) fn read_from<R: Read>(r: &mut R) -> Result<Self, VolumeError> {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        r.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                VolumeError::Corrupt {
                    last_good_offset: 0,
                    reason: "data file shorter than the superblock".to_string(),
                }
            } else {
                VolumeError::Io(e)
            }
        })?;
        Self::from_bytes(&buf)
    }
}
