use std::collections::HashMap;

use needle::NeedleId;

use crate::{Counters, NeedleMap, NeedleValue};

/// Hash-map backed needle map. One `HashMap` entry per live needle; the
/// default choice for read-heavy volumes.
#[derive(Debug, Default)]
pub struct MemoryNeedleMap {
    map: HashMap<NeedleId, NeedleValue>,
    counters: Counters,
}

impl MemoryNeedleMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NeedleMap for MemoryNeedleMap {
    fn get(&self, id: NeedleId) -> Option<NeedleValue> {
        self.map.get(&id).copied()
    }

    fn set(&mut self, id: NeedleId, value: NeedleValue) -> Option<NeedleValue> {
        let old = self.map.insert(id, value);
        self.counters.on_set(old);
        old
    }

    fn delete(&mut self, id: NeedleId) -> Option<NeedleValue> {
        let old = self.map.remove(&id);
        self.counters.on_delete(old);
        old
    }

    fn len(&self) -> usize {
        self.map.len()
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
