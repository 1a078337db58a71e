/// Sparse byte-addressed map from addresses to symbolic expressions, organized in aligned
/// 8-byte slabs. Bytes with no entry are concrete.

use std::collections::{BTreeMap, BTreeSet};

use log::trace;

use crate::concolic::ops::{Addr, Value, ValueType, VarId};
use crate::concolic::SymbolicExpr;

pub const SLAB_CAPACITY: usize = 8;
const OFFSET_MASK: Addr = SLAB_CAPACITY as Addr - 1;
const ADDR_MASK: Addr = !OFFSET_MASK;

/// One aligned 8-byte window. A multi-byte expression sits whole in the slot of its first byte;
/// the slots it spans after that stay empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Slab {
    slots: [Option<SymbolicExpr>; SLAB_CAPACITY],
}

impl Slab {
    pub fn from_slots(slots: [Option<SymbolicExpr>; SLAB_CAPACITY]) -> Self {
        Slab { slots }
    }

    pub fn slots(&self) -> &[Option<SymbolicExpr>; SLAB_CAPACITY] {
        &self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    // Slot of the expression that may span byte `i`: the nearest occupied slot found by clearing
    // low bits of `i`, which is where any naturally aligned covering expression must start.
    fn covering_slot(&self, i: usize) -> usize {
        let mut j = i;
        while j != 0 && self.slots[j].is_none() {
            j &= j - 1;
        }
        j
    }

    fn read(&self, i: usize, n: usize, concrete: Value) -> Option<SymbolicExpr> {
        let j = self.covering_slot(i);
        if let Some(expr) = &self.slots[j] {
            if expr.size() > n && j + expr.size() > i {
                return Some(SymbolicExpr::extract_bytes(expr.clone(), i - j, n));
            }
        }

        let mut pieces: Vec<SymbolicExpr> = Vec::new();
        let mut symbolic = false;
        let mut k = 0;
        while k < n {
            match &self.slots[i + k] {
                Some(expr) => {
                    assert!(k + expr.size() <= n, "misaligned symbolic value inside slab");
                    pieces.push(expr.clone());
                    symbolic = true;
                    k += expr.size();
                }
                None => {
                    let first = k;
                    k += 1;
                    while k < n && self.slots[i + k].is_none() {
                        k += 1;
                    }
                    pieces.push(SymbolicExpr::concrete_bytes_of(concrete, first, k - first));
                }
            }
        }

        if !symbolic {
            return None;
        }
        // Pieces are in ascending address order, which is ascending significance.
        pieces.into_iter().reduce(|low, high| SymbolicExpr::concatenate(high, low))
    }

    fn write(&mut self, i: usize, n: usize, expr: Option<SymbolicExpr>) {
        let j = self.covering_slot(i);
        let overlaps = match &self.slots[j] {
            Some(old) => old.size() > n && j + old.size() > i,
            None => false,
        };
        if overlaps {
            if let Some(old) = self.slots[j].take() {
                for k in 0..old.size() {
                    self.slots[j + k] = Some(SymbolicExpr::extract_bytes(old.clone(), k, 1));
                }
            }
        }

        for slot in &mut self.slots[i..i + n] {
            *slot = None;
        }
        self.slots[i] = expr;
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SymbolicMemory {
    slabs: BTreeMap<Addr, Slab>,
}

fn check_alignment(addr: Addr, n: usize) {
    let offset = (addr & OFFSET_MASK) as usize;
    assert!(
        n > 0 && offset % n == 0 && offset + n <= SLAB_CAPACITY,
        "unaligned access of {} bytes at 0x{:x}",
        n,
        addr
    );
}

impl SymbolicMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.slabs.is_empty()
    }

    pub fn slabs(&self) -> impl Iterator<Item = (&Addr, &Slab)> {
        self.slabs.iter()
    }

    pub fn insert_slab(&mut self, addr: Addr, slab: Slab) {
        if !slab.is_empty() {
            self.slabs.insert(addr & ADDR_MASK, slab);
        }
    }

    /// Symbolic view of a value of type `ty` at `addr`, or `None` when every byte is concrete.
    /// Aggregates are never read symbolically.
    pub fn read(&self, addr: Addr, ty: ValueType, concrete: Value) -> Option<SymbolicExpr> {
        if ty.is_struct() {
            return None;
        }
        self.read_sized(addr, ty.size(), concrete)
    }

    pub fn read_sized(&self, addr: Addr, n: usize, concrete: Value) -> Option<SymbolicExpr> {
        check_alignment(addr, n);
        let slab = self.slabs.get(&(addr & ADDR_MASK))?;
        slab.read((addr & OFFSET_MASK) as usize, n, concrete)
    }

    pub fn write(&mut self, addr: Addr, expr: SymbolicExpr) {
        let n = expr.size();
        check_alignment(addr, n);
        trace!("symbolic write of {} bytes at 0x{:x}: {}", n, addr, expr);
        let slab = self.slabs.entry(addr & ADDR_MASK).or_default();
        slab.write((addr & OFFSET_MASK) as usize, n, Some(expr));
    }

    /// Mark `n` bytes starting at `addr` as concrete. The range may be arbitrarily large and
    /// unaligned; slabs left without symbolic content are dropped.
    pub fn concretize(&mut self, addr: Addr, n: usize) {
        let mut addr = addr;
        let mut remaining = n;
        while remaining > 0 {
            let base = addr & ADDR_MASK;
            let offset = (addr & OFFSET_MASK) as usize;
            let slab = match self.slabs.get_mut(&base) {
                Some(slab) => slab,
                None => {
                    let skip = SLAB_CAPACITY - offset;
                    if skip >= remaining {
                        break;
                    }
                    remaining -= skip;
                    addr = base.wrapping_add(SLAB_CAPACITY as Addr);
                    continue;
                }
            };

            let mut chunk = if offset == 0 { SLAB_CAPACITY } else { 1 << offset.trailing_zeros() };
            while chunk > remaining {
                chunk >>= 1;
            }
            slab.write(offset, chunk, None);
            if slab.is_empty() {
                self.slabs.remove(&base);
            }
            addr = addr.wrapping_add(chunk as Addr);
            remaining -= chunk;
        }
    }

    pub fn append_vars(&self, vars: &mut BTreeSet<VarId>) {
        for slab in self.slabs.values() {
            for expr in slab.slots.iter().flatten() {
                expr.append_vars(vars);
            }
        }
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (base, slab) in &self.slabs {
            for (i, slot) in slab.slots.iter().enumerate() {
                if let Some(expr) = slot {
                    out.push_str(&format!("0x{:x}: {}\n", base + i as Addr, expr));
                }
            }
        }
        out
    }
}
