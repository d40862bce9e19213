//! # Volume - Append-Only Needle Store
//!
//! The central orchestrator that ties the [`needle`], [`index`], and
//! [`needlemap`] crates into one on-disk volume.
//!
//! ## Architecture
//!
//! ```text
//! Caller
//!   |
//!   v
//! ┌──────────────────────────────────────────────────┐
//! │                    VOLUME                        │
//! │                                                  │
//! │ write.rs → encode needle → append .dat           │
//! │              |                                   │
//! │              v                                   │
//! │          append .idx entry → update needle map   │
//! │                                                  │
//! │ read.rs → needle map lookup → decode at offset   │
//! │                                                  │
//! │ scan.rs → superblock, then every record in file  │
//! │           order (export, repair, compaction)     │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## On-disk state
//!
//! A volume is the file pair `<name>.dat` / `<name>.idx`, where `<name>`
//! is `<collection>_<id>` (or just `<id>` for the empty collection). The
//! data file opens with an 8-byte superblock pinning the record version,
//! followed by 8-byte-aligned needle records. The index file is a tight
//! array of 16-byte entries replayed on open to rebuild the in-memory
//! needle map.
//!
//! ## Crash Safety
//!
//! The write path orders: data write, data flush, index append, index
//! flush, map update. A crash after the data flush but before the index
//! append leaves an orphan record; [`Volume::open`] scans the data-file
//! tail past the last indexed byte and re-indexes what it finds. A torn
//! record at the very end of the data file is truncated away on open, the
//! same way a write-ahead log discards a partial tail. The index file
//! itself needs no repair beyond replay: the last entry per id wins.
//!
//! ## Concurrency
//!
//! A volume is owned by a single actor; every mutation takes `&mut self`.
//! Point reads go through an internal reader handle behind a mutex and
//! are safe from multiple threads once the owner has flushed.

mod compact;
mod read;
mod recovery;
mod scan;
mod superblock;
mod write;

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

use index::{IndexError, IndexReader, IndexWriter};
use needle::{NeedleError, NeedleId, Version, VolumeId};
use needlemap::{NeedleMap, NeedleMapKind, load_needle_map};

pub use compact::{CompactOutcome, compact_volume, copy_live_needles};
pub use recovery::rebuild_index;
pub use scan::{ScanNext, ScanOptions, scan_volume_file};
pub use superblock::{SUPERBLOCK_SIZE, Superblock};

/// Errors surfaced by the volume layer.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The id is absent from the needle map, or the volume files are
    /// missing on disk.
    #[error("not found: {0}")]
    NotFound(String),

    /// Undecodable on-disk state. `last_good_offset` is the data-file
    /// offset of the first record that could not be decoded; everything
    /// before it remains trustworthy.
    #[error("corrupt volume at offset {last_good_offset}: {reason}")]
    Corrupt { last_good_offset: u64, reason: String },

    /// The caller supplied a record encoded for a version other than the
    /// one pinned by this volume's superblock.
    #[error("version mismatch: got v{given}, volume is pinned to v{pinned}")]
    VersionMismatch { given: Version, pinned: Version },

    /// The append would push a header offset past what the index's 32-bit
    /// offset-units field can address (32 GiB).
    #[error("volume full: append offset would overflow the index offset field")]
    VolumeFull,

    #[error(transparent)]
    Needle(#[from] NeedleError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// One open volume: the data file, its index writer, and the in-memory
/// needle map rebuilt on open.
pub struct Volume {
    id: VolumeId,
    collection: String,
    dir: PathBuf,
    superblock: Superblock,
    /// Append handle for the data file.
    dat: File,
    /// Dedicated read handle so point reads work through `&self`.
    dat_reader: Mutex<BufReader<File>>,
    /// Cached end of file; every append keeps it a multiple of 8.
    dat_len: u64,
    idx: IndexWriter,
    map: Box<dyn NeedleMap>,
    /// If `true`, every append syncs the data file before the index entry
    /// is written and the index after.
    sync: bool,
}

/// A poisoned reader lock means a reader thread panicked mid-decode; the
/// handle's seek position is unknown, so reads are refused.
pub(crate) fn reader_poisoned() -> VolumeError {
    VolumeError::Io(io::Error::other("volume reader lock poisoned"))
}

/// `<collection>_<id>` or `<id>` for the empty collection.
#[must_use]
pub fn volume_file_name(collection: &str, id: VolumeId) -> String {
    if collection.is_empty() {
        id.to_string()
    } else {
        format!("{}_{}", collection, id)
    }
}

/// Path of the volume data file.
#[must_use]
pub fn dat_path(dir: &Path, collection: &str, id: VolumeId) -> PathBuf {
    dir.join(format!("{}.dat", volume_file_name(collection, id)))
}

/// Path of the volume index file.
#[must_use]
pub fn idx_path(dir: &Path, collection: &str, id: VolumeId) -> PathBuf {
    dir.join(format!("{}.idx", volume_file_name(collection, id)))
}

impl Volume {
    /// Creates a fresh volume: writes the superblock and an empty index.
    ///
    /// # Errors
    ///
    /// Fails if either file already exists or cannot be created.
    pub fn create(
        dir: &Path,
        collection: &str,
        id: VolumeId,
        superblock: Superblock,
        sync: bool,
    ) -> Result<Self, VolumeError> {
        let dat = dat_path(dir, collection, id);
        let idx = idx_path(dir, collection, id);
        Self::create_files(&dat, &idx, dir, collection, id, superblock, sync)
    }

    /// Creates a volume over explicit file paths. Compaction uses this to
    /// build its replacement files next to the originals before the
    /// rename swap.
    pub(crate) fn create_files(
        dat_path: &Path,
        idx_path: &Path,
        dir: &Path,
        collection: &str,
        id: VolumeId,
        superblock: Superblock,
        sync: bool,
    ) -> Result<Self, VolumeError> {
        let mut dat = OpenOptions::new()
            .create_new(true)
            .append(true)
            .read(true)
            .open(dat_path)?;
        superblock.write_to(&mut dat)?;
        dat.sync_all()?;

        let idx = IndexWriter::create(idx_path, false)?;
        let reader = BufReader::new(File::open(dat_path)?);

        debug!(volume = %id, version = %superblock.version, "created volume");
        Ok(Volume {
            id,
            collection: collection.to_string(),
            dir: dir.to_path_buf(),
            superblock,
            dat,
            dat_reader: Mutex::new(reader),
            dat_len: SUPERBLOCK_SIZE as u64,
            idx,
            map: NeedleMapKind::Memory.new_map(),
            sync,
        })
    }

    /// Opens an existing volume for reading and appending.
    ///
    /// # Recovery Steps
    ///
    /// 1. Read and validate the superblock (pins the record version).
    /// 2. Replay the index file into a fresh needle map of `kind`.
    /// 3. Scan the data-file tail past the last indexed byte: complete
    ///    records are re-indexed (crash between data flush and index
    ///    append); a torn final record is truncated away.
    pub fn open(
        dir: &Path,
        collection: &str,
        id: VolumeId,
        kind: NeedleMapKind,
        sync: bool,
    ) -> Result<Self, VolumeError> {
        let dat_file_path = dat_path(dir, collection, id);
        let idx_file_path = idx_path(dir, collection, id);
        if !dat_file_path.exists() {
            return Err(VolumeError::NotFound(format!(
                "volume data file {}",
                dat_file_path.display()
            )));
        }

        let dat = OpenOptions::new()
            .append(true)
            .read(true)
            .open(&dat_file_path)?;
        let dat_len = dat.metadata()?.len();

        let mut reader = BufReader::new(File::open(&dat_file_path)?);
        let superblock = Superblock::read_from(&mut reader)?;

        let mut map = kind.new_map();
        let indexed_end = if idx_file_path.exists() {
            let mut idx_reader = IndexReader::open(&idx_file_path)?;
            let loaded = load_needle_map(&mut idx_reader, map.as_mut())?;
            loaded.data_end
        } else {
            0
        };

        let idx = IndexWriter::create(&idx_file_path, false)?;

        let mut volume = Volume {
            id,
            collection: collection.to_string(),
            dir: dir.to_path_buf(),
            superblock,
            dat,
            dat_reader: Mutex::new(reader),
            dat_len,
            idx,
            map,
            sync,
        };
        volume.recover_tail(indexed_end.max(SUPERBLOCK_SIZE as u64))?;

        debug!(
            volume = %id,
            version = %volume.superblock.version,
            live = volume.map.len(),
            data_len = volume.dat_len,
            "opened volume"
        );
        Ok(volume)
    }

    #[must_use]
    pub fn id(&self) -> VolumeId {
        self.id
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Directory holding this volume's file pair.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.superblock.version
    }

    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Current data-file length in bytes.
    #[must_use]
    pub fn data_size(&self) -> u64 {
        self.dat_len
    }

    /// Live needles in the map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.len() == 0
    }

    #[must_use]
    pub fn file_count(&self) -> u64 {
        self.map.file_count()
    }

    #[must_use]
    pub fn deleted_count(&self) -> u64 {
        self.map.deleted_count()
    }

    /// Disk bytes that compaction would reclaim.
    #[must_use]
    pub fn deleted_bytes(&self) -> u64 {
        self.map.deleted_bytes()
    }

    /// Map lookup without touching the data file.
    #[must_use]
    pub fn contains(&self, id: NeedleId) -> bool {
        self.map.get(id).is_some()
    }

    /// Forces both files to disk: data first, then index, preserving the
    /// recovery invariant that every indexed record is durable.
    pub fn flush(&mut self) -> Result<(), VolumeError> {
        self.dat.sync_all()?;
        self.idx.sync_to_disk()?;
        Ok(())
    }
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("id", &self.id)
            .field("collection", &self.collection)
            .field("version", &self.superblock.version)
            .field("data_len", &self.dat_len)
            .field("live", &self.map.len())
            .field("file_count", &self.map.file_count())
            .field("deleted_count", &self.map.deleted_count())
            .field("deleted_bytes", &self.map.deleted_bytes())
            .finish()
    }
}

/// Best-effort flush on drop. Errors are ignored because `Drop` cannot
/// propagate them; the open-time tail scan re-derives anything lost.
impl Drop for Volume {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests;
