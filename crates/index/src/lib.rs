//! # Index - Volume Index File
//!
//! The append-only `.idx` file that sits beside every volume data file. It
//! records, in write order, where each needle landed in the data file; the
//! in-memory needle map is reconstructed by replaying it on volume open,
//! guaranteeing that the map never has to be persisted itself.
//!
//! ## Binary Entry Format
//!
//! ```text
//! [id: u64 BE][offset_units: u32 BE][size: u32 BE]
//! ```
//!
//! Exactly 16 bytes per entry, no file header, no per-entry checksum.
//! `offset_units * 8` is the byte offset of the needle's header in the data
//! file (the data file aligns every record to 8 bytes, so a u32 of units
//! addresses 32 GiB). `size` is the needle's full on-disk footprint; an
//! entry with `size == 0` is a tombstone that logically deletes its id.
//!
//! ## Replay
//!
//! Entries are replayed in file order and the **last** entry for an id
//! wins. A trailing fragment shorter than 16 bytes (crash mid-append) is
//! reported as [`IndexError::Corrupt`] carrying the length of the valid
//! prefix, after every complete entry has been replayed, so the caller
//! can truncate the file and continue.
//!
//! ## Example
//!
//! ```rust,no_run
//! use index::{IndexEntry, IndexReader, IndexWriter};
//!
//! let mut w = IndexWriter::create("1.idx", true).unwrap();
//! w.append(&IndexEntry { id: 42, offset_units: 1, size: 48 }).unwrap();
//! w.append(&IndexEntry::tombstone(42)).unwrap();
//! drop(w);
//!
//! let mut r = IndexReader::open("1.idx").unwrap();
//! r.replay(|e| println!("{:?}", e)).unwrap();
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;
use tracing::warn;

use needle::NeedleId;

/// Bytes per index entry.
pub const INDEX_ENTRY_SIZE: usize = 16;

/// One `(id, offset_units, size)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: NeedleId,
    /// Data-file byte offset divided by 8.
    pub offset_units: u32,
    /// On-disk footprint of the needle; zero marks a deletion.
    pub size: u32,
}

impl IndexEntry {
    /// A deletion marker for `id`.
    #[must_use]
    pub fn tombstone(id: NeedleId) -> Self {
        IndexEntry {
            id,
            offset_units: 0,
            size: 0,
        }
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.size == 0
    }

    /// The byte offset of the needle's header in the data file.
    #[must_use]
    pub fn byte_offset(&self) -> u64 {
        u64::from(self.offset_units) * 8
    }

    fn from_bytes(mut buf: &[u8]) -> io::Result<Self> {
        Ok(IndexEntry {
            id: buf.read_u64::<BigEndian>()?,
            offset_units: buf.read_u32::<BigEndian>()?,
            size: buf.read_u32::<BigEndian>()?,
        })
    }
}

/// Errors that can occur during index file operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The file ends in a fragment shorter than one entry. `valid_len` is
    /// the byte length of the complete-entry prefix; truncating the file
    /// to it yields a well-formed index.
    #[error("corrupt index file: trailing fragment after {valid_len} valid bytes")]
    Corrupt { valid_len: u64 },
}

/// Append-only index writer.
///
/// Each entry is serialized into a 16-byte stack buffer and written with a
/// single `write_all`. When `sync` is `true`, every append is followed by
/// `sync_all()` so the entry is durable before the call returns; writers
/// that batch (the volume write path syncs once per needle, after the data
/// file) pass `false` and call [`IndexWriter::sync_to_disk`] themselves.
pub struct IndexWriter {
    file: File,
    sync: bool,
}

impl IndexWriter {
    /// Opens (or creates) an index file in append mode.
    pub fn create<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, IndexError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        Ok(Self { file, sync })
    }

    /// Appends one entry.
    pub fn append(&mut self, entry: &IndexEntry) -> Result<(), IndexError> {
        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        {
            let mut w = &mut buf[..];
            w.write_u64::<BigEndian>(entry.id)?;
            w.write_u32::<BigEndian>(entry.offset_units)?;
            w.write_u32::<BigEndian>(entry.size)?;
        }
        self.file.write_all(&buf)?;
        if self.sync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Forces all buffered entries to disk via `sync_all()`.
    pub fn sync_to_disk(&mut self) -> Result<(), IndexError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Current length of the index file in bytes.
    pub fn len(&self) -> Result<u64, IndexError> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len()? == 0)
    }
}

/// Sequential index reader.
///
/// Generic over any `Read` implementor so tests can replay from in-memory
/// buffers; real callers use `IndexReader<File>`.
pub struct IndexReader<R: Read> {
    rdr: BufReader<R>,
}

impl IndexReader<File> {
    /// Opens an existing index file for replay.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<IndexReader<File>, IndexError> {
        let f = File::open(path)?;
        Ok(IndexReader {
            rdr: BufReader::new(f),
        })
    }
}

impl<R: Read> IndexReader<R> {
    /// Constructs a reader from any `Read` implementor.
    pub fn from_reader(reader: R) -> Self {
        IndexReader {
            rdr: BufReader::new(reader),
        }
    }

    /// Replays every complete entry in file order.
    ///
    /// # Termination
    ///
    /// - **Clean EOF** on an entry boundary -> `Ok(bytes_replayed)`.
    /// - **Trailing fragment** -> `Err(Corrupt { valid_len })`, after the
    ///   callback has seen every complete entry before the fragment.
    /// - **I/O error** -> `Err(Io)`.
    pub fn replay<F>(&mut self, apply: F) -> Result<u64, IndexError>
    where
        F: FnMut(IndexEntry),
    {
        self.walk_inner(0, apply)
    }

    /// Resumes replay at `from` (a byte offset that must lie on an entry
    /// boundary), returning the offset one past the last complete entry.
    /// Watchers mirroring the index call this repeatedly with the returned
    /// offset.
    pub fn walk_from<F>(&mut self, from: u64, apply: F) -> Result<u64, IndexError>
    where
        R: Seek,
        F: FnMut(IndexEntry),
    {
        if from % INDEX_ENTRY_SIZE as u64 != 0 {
            return Err(IndexError::Corrupt {
                valid_len: from - from % INDEX_ENTRY_SIZE as u64,
            });
        }
        self.rdr.seek(SeekFrom::Start(from))?;
        self.walk_inner(from, apply)
    }

    fn walk_inner<F>(&mut self, start: u64, mut apply: F) -> Result<u64, IndexError>
    where
        F: FnMut(IndexEntry),
    {
        let mut offset = start;
        let mut buf = [0u8; INDEX_ENTRY_SIZE];

        loop {
            match read_full(&mut self.rdr, &mut buf)? {
                0 => return Ok(offset),
                INDEX_ENTRY_SIZE => {
                    apply(IndexEntry::from_bytes(&buf)?);
                    offset += INDEX_ENTRY_SIZE as u64;
                }
                short => {
                    warn!(
                        valid_len = offset,
                        fragment = short,
                        "index file ends in a partial entry"
                    );
                    return Err(IndexError::Corrupt { valid_len: offset });
                }
            }
        }
    }
}

/// Reads until `buf` is full or EOF; returns the bytes read.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match r.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(m) => n += m,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(n)
}

#[cfg(test)]
mod tests;
