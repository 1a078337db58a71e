use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use log::{debug, warn};

use crate::concolic::ops::Addr;

use super::symbolic_object::SymbolicObject;

/// Registry of tracked objects, keyed by end address so that the object containing an address is
/// the first one ending strictly after it.
#[derive(Clone, Debug, Default)]
pub struct ObjectTracker {
    objects: BTreeMap<Addr, SymbolicObject>,
}

impl ObjectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SymbolicObject> {
        self.objects.values()
    }

    pub fn add(&mut self, start: Addr, size: usize) {
        if size == 0 {
            return;
        }
        let object = SymbolicObject::new(start, size);
        debug!("tracking object [0x{:x}, 0x{:x})", start, object.end());
        if let Some(previous) = self.objects.insert(object.end(), object) {
            warn!("replaced tracked object [0x{:x}, 0x{:x})", previous.start(), previous.end());
        }
    }

    /// Stop tracking the object starting exactly at `start`. Unknown addresses are ignored.
    pub fn remove(&mut self, start: Addr) {
        let end = match self.objects.range((Excluded(start), Unbounded)).next() {
            Some((end, object)) if object.start() == start => *end,
            _ => return,
        };
        self.objects.remove(&end);
        debug!("released object at 0x{:x}", start);
    }

    pub fn find(&self, addr: Addr) -> Option<&SymbolicObject> {
        self.objects
            .range((Excluded(addr), Unbounded))
            .next()
            .map(|(_, object)| object)
            .filter(|object| object.start() <= addr)
    }

    pub fn find_mut(&mut self, addr: Addr) -> Option<&mut SymbolicObject> {
        self.objects
            .range_mut((Excluded(addr), Unbounded))
            .next()
            .map(|(_, object)| object)
            .filter(|object| object.start() <= addr)
    }

    pub fn dump(&self) -> String {
        self.objects
            .values()
            .map(|object| {
                format!(
                    "[0x{:x}, 0x{:x}) {} symbolic writes\n",
                    object.start(),
                    object.end(),
                    object.writes().len()
                )
            })
            .collect()
    }
}
