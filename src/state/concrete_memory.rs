/// Access to the concrete bytes of the program under test.

use std::collections::BTreeMap;

use crate::concolic::ops::{Addr, Value};

pub trait ConcreteMemory {
    fn read_bytes(&self, addr: Addr, len: usize) -> Vec<u8>;
}

/// Reads the memory of the current process, where the instrumented program runs.
pub struct ProcessMemory;

impl ConcreteMemory for ProcessMemory {
    fn read_bytes(&self, addr: Addr, len: usize) -> Vec<u8> {
        if addr == 0 || len == 0 {
            return Vec::new();
        }
        // SAFETY: the instrumentation only registers live allocations and globals of this
        // process, and objects are unregistered before they are freed.
        unsafe { std::slice::from_raw_parts(addr as *const u8, len) }.to_vec()
    }
}

/// Sparse byte image of a target's memory. Unset bytes read as zero.
#[derive(Clone, Debug, Default)]
pub struct MemoryImage {
    bytes: BTreeMap<Addr, u8>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bytes(&mut self, addr: Addr, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            self.bytes.insert(addr + i as Addr, *byte);
        }
    }

    // Little-endian store of the low `size` bytes of `value`.
    pub fn write_value(&mut self, addr: Addr, size: usize, value: Value) {
        let bytes = value.to_le_bytes();
        self.write_bytes(addr, &bytes[..size.min(8)]);
    }
}

impl ConcreteMemory for MemoryImage {
    fn read_bytes(&self, addr: Addr, len: usize) -> Vec<u8> {
        (0..len as Addr)
            .map(|i| self.bytes.get(&(addr + i)).copied().unwrap_or(0))
            .collect()
    }
}
