use std::collections::BTreeMap;

use needle::NeedleId;

use crate::{Counters, NeedleMap, NeedleValue};

/// Mutations buffered before the delta is folded into the base run.
const DELTA_LIMIT: usize = 1024;

/// Needle map backed by one sorted run plus a small unsorted delta.
///
/// The base run is a flat `Vec` sorted by id (16 bytes per entry, no
/// hashing overhead); lookups binary-search it. Mutations append to the
/// delta and are folded into the base once [`DELTA_LIMIT`] accumulate, so
/// a lookup is a short reverse scan of the delta plus one binary search.
/// Slower than [`crate::MemoryNeedleMap`], considerably smaller for
/// volumes with millions of needles.
#[derive(Debug, Default)]
pub struct CompactNeedleMap {
    /// Sorted by id, live entries only.
    base: Vec<(NeedleId, NeedleValue)>,
    /// Op log since the last fold; `None` marks a delete. Newest last.
    delta: Vec<(NeedleId, Option<NeedleValue>)>,
    live: usize,
    counters: Counters,
}

impl CompactNeedleMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, id: NeedleId) -> Option<NeedleValue> {
        // newest delta op for the id wins over the base run
        for (did, value) in self.delta.iter().rev() {
            if *did == id {
                return *value;
            }
        }
        self.base
            .binary_search_by_key(&id, |(bid, _)| *bid)
            .ok()
            .map(|i| self.base[i].1)
    }

    fn fold(&mut self) {
        if self.delta.is_empty() {
            return;
        }
        // last op per id wins; BTreeMap gives them back in id order for
        // the merge below
        let mut ops: BTreeMap<NeedleId, Option<NeedleValue>> = BTreeMap::new();
        for (id, value) in self.delta.drain(..) {
            ops.insert(id, value);
        }

        let mut merged = Vec::with_capacity(self.base.len() + ops.len());
        let mut ops_iter = ops.into_iter().peekable();

        for (id, value) in std::mem::take(&mut self.base) {
            while let Some(&(op_id, op_value)) = ops_iter.peek() {
                if op_id >= id {
                    break;
                }
                ops_iter.next();
                if let Some(v) = op_value {
                    merged.push((op_id, v));
                }
            }
            match ops_iter.peek() {
                Some(&(op_id, op_value)) if op_id == id => {
                    ops_iter.next();
                    if let Some(v) = op_value {
                        merged.push((id, v));
                    }
                }
                _ => merged.push((id, value)),
            }
        }
        for (op_id, op_value) in ops_iter {
            if let Some(v) = op_value {
                merged.push((op_id, v));
            }
        }

        self.base = merged;
        debug_assert_eq!(self.base.len(), self.live);
    }
}

impl NeedleMap for CompactNeedleMap {
    fn get(&self, id: NeedleId) -> Option<NeedleValue> {
        self.lookup(id)
    }

    fn set(&mut self, id: NeedleId, value: NeedleValue) -> Option<NeedleValue> {
        let old = self.lookup(id);
        if old.is_none() {
            self.live += 1;
        }
        self.counters.on_set(old);
        self.delta.push((id, Some(value)));
        if self.delta.len() >= DELTA_LIMIT {
            self.fold();
        }
        old
    }

    fn delete(&mut self, id: NeedleId) -> Option<NeedleValue> {
        let old = self.lookup(id);
        if old.is_some() {
            self.live -= 1;
            self.delta.push((id, None));
            if self.delta.len() >= DELTA_LIMIT {
                self.fold();
            }
        }
        self.counters.on_delete(old);
        old
    }

    fn len(&self) -> usize {
        self.live
    }

    fn file_count(&self) -> u64 {
        self.counters.file_count
    }

    fn deleted_count(&self) -> u64 {
        self.counters.deleted_count
    }

    fn deleted_bytes(&self) -> u64 {
        self.counters.deleted_bytes
    }
}
