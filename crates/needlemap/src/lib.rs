//! In-memory needle map: `NeedleId -> (offset_units, size)`.
//!
//! The map is the authoritative view of *liveness* for a volume. It is
//! never persisted; it is rebuilt on open by replaying the index file,
//! entry by entry, with the last entry per id winning. A needle physically
//! present in the data file but absent here (or recorded at a different
//! offset) is dead.
//!
//! Two implementations share one contract: [`MemoryNeedleMap`] (plain hash
//! map, fast, higher memory) and [`CompactNeedleMap`] (sorted run plus a
//! bounded delta, lower memory, slower lookup). Callers pick via
//! [`NeedleMapKind`]; nothing may depend on iteration order.

use std::io::Read;

use index::{IndexError, IndexReader};
use needle::NeedleId;
use tracing::warn;

mod compact;
mod memory;

pub use compact::CompactNeedleMap;
pub use memory::MemoryNeedleMap;

/// The value half of a map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedleValue {
    /// Data-file byte offset of the needle header, divided by 8.
    pub offset_units: u32,
    /// Full on-disk footprint of the needle.
    pub size: u32,
}

impl NeedleValue {
    /// The byte offset of the needle's header in the data file.
    #[must_use]
    pub fn byte_offset(&self) -> u64 {
        u64::from(self.offset_units) * 8
    }
}

/// Which map implementation a volume should build on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NeedleMapKind {
    #[default]
    Memory,
    Compact,
}

impl NeedleMapKind {
    #[must_use]
    pub fn new_map(self) -> Box<dyn NeedleMap> {
        match self {
            NeedleMapKind::Memory => Box::new(MemoryNeedleMap::new()),
            NeedleMapKind::Compact => Box::new(CompactNeedleMap::new()),
        }
    }
}

/// The needle map contract. See the module docs for the liveness rule.
pub trait NeedleMap: Send {
    /// Looks up a live entry.
    fn get(&self, id: NeedleId) -> Option<NeedleValue>;

    /// Inserts or overwrites `id`, returning the shadowed value if any.
    /// An overwrite logically deletes the prior version: its size is added
    /// to `deleted_bytes`. A fresh insert bumps `file_count`.
    fn set(&mut self, id: NeedleId, value: NeedleValue) -> Option<NeedleValue>;

    /// Removes `id`, returning the value it held. A hit bumps
    /// `deleted_count` and adds the reclaimed size to `deleted_bytes`.
    fn delete(&mut self, id: NeedleId) -> Option<NeedleValue>;

    /// Live entries currently in the map.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct insertions observed (overwrites excluded).
    fn file_count(&self) -> u64;

    /// Explicit deletions observed.
    fn deleted_count(&self) -> u64;

    /// Disk bytes shadowed by overwrites or reclaimed by deletions.
    fn deleted_bytes(&self) -> u64;
}

/// Aggregate counters shared by both implementations.
#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    file_count: u64,
    deleted_count: u64,
    deleted_bytes: u64,
}

impl Counters {
    fn on_set(&mut self, old: Option<NeedleValue>) {
        match old {
            Some(prev) => self.deleted_bytes += u64::from(prev.size),
            None => self.file_count += 1,
        }
    }

    fn on_delete(&mut self, old: Option<NeedleValue>) {
        if let Some(prev) = old {
            self.deleted_count += 1;
            self.deleted_bytes += u64::from(prev.size);
        }
    }
}

/// Outcome of [`load_needle_map`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadResult {
    /// Index bytes replayed (a multiple of 16).
    pub index_bytes: u64,
    /// One past the end of the farthest-reaching indexed needle in the
    /// data file; the tail-recovery scan starts here.
    pub data_end: u64,
}

/// Builds `map` by replaying an index file. The last entry per id wins:
/// a sized entry inserts or overwrites, a tombstone removes. Entries with
/// id zero are skipped (zero is reserved).
pub fn load_needle_map<R: Read>(
    reader: &mut IndexReader<R>,
    map: &mut dyn NeedleMap,
) -> Result<LoadResult, IndexError> {
    let mut data_end = 0u64;
    let index_bytes = reader.replay(|entry| {
        if entry.id == 0 {
            warn!("skipping index entry with reserved id 0");
            return;
        }
        if entry.is_tombstone() {
            map.delete(entry.id);
        } else {
            data_end = data_end.max(entry.byte_offset() + u64::from(entry.size));
            map.set(
                entry.id,
                NeedleValue {
                    offset_units: entry.offset_units,
                    size: entry.size,
                },
            );
        }
    })?;
    Ok(LoadResult {
        index_bytes,
        data_end,
    })
}
