/// A contiguous tracked region (array, heap block, global) that may be accessed through symbolic
/// addresses.
///
/// While no access has used a symbolic address the object behaves like plain symbolic memory.
/// Once one has, it switches to deref mode for good: reads produce `Deref` nodes over a snapshot
/// of the object and writes are appended to an ordered write log.

use std::collections::BTreeSet;

use log::warn;

use crate::concolic::ops::{Addr, Value, ValueType, VarId};
use crate::concolic::SymbolicExpr;

use super::concrete_memory::ConcreteMemory;
use super::symbolic_memory::SymbolicMemory;

#[derive(Clone, Debug, PartialEq)]
pub struct SymbolicObject {
    start: Addr,
    size: usize,
    memory: SymbolicMemory,
    writes: Vec<(SymbolicExpr, SymbolicExpr)>,
}

impl SymbolicObject {
    pub fn new(start: Addr, size: usize) -> Self {
        SymbolicObject { start, size, memory: SymbolicMemory::new(), writes: Vec::new() }
    }

    pub fn from_parts(start: Addr, size: usize, memory: SymbolicMemory, writes: Vec<(SymbolicExpr, SymbolicExpr)>) -> Self {
        SymbolicObject { start, size, memory, writes }
    }

    pub fn start(&self) -> Addr {
        self.start
    }

    pub fn end(&self) -> Addr {
        self.start + self.size as Addr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn memory(&self) -> &SymbolicMemory {
        &self.memory
    }

    pub fn writes(&self) -> &[(SymbolicExpr, SymbolicExpr)] {
        &self.writes
    }

    pub fn contains(&self, addr: Addr) -> bool {
        self.start <= addr && addr < self.end()
    }

    pub fn in_deref_mode(&self) -> bool {
        !self.writes.is_empty()
    }

    fn uses_symbolic_access(&self, sym_addr: Option<&SymbolicExpr>) -> bool {
        self.in_deref_mode() || sym_addr.map_or(false, |addr| !addr.is_concrete())
    }

    fn address_expr(sym_addr: Option<SymbolicExpr>, addr: Addr) -> SymbolicExpr {
        match sym_addr {
            Some(expr) if !expr.is_concrete() => expr,
            _ => SymbolicExpr::new_concrete(ValueType::ULong, addr as Value),
        }
    }

    /// Read through a concrete address.
    pub fn read(&self, addr: Addr, ty: ValueType, concrete: Value, bytes: &dyn ConcreteMemory) -> Option<SymbolicExpr> {
        if !self.in_deref_mode() {
            return self.memory.read(addr, ty, concrete);
        }
        if ty.is_struct() {
            return None;
        }
        let snapshot = bytes.read_bytes(self.start, self.size);
        Some(SymbolicExpr::new_const_deref(ty, concrete, self.clone(), addr, snapshot))
    }

    pub fn write(&mut self, sym_addr: Option<SymbolicExpr>, addr: Addr, value: SymbolicExpr) {
        if self.uses_symbolic_access(sym_addr.as_ref()) {
            self.writes.push((Self::address_expr(sym_addr, addr), value));
        } else {
            self.memory.write(addr, value);
        }
    }

    pub fn concretize(&mut self, sym_addr: Option<SymbolicExpr>, addr: Addr, ty: ValueType, concrete: Value) {
        if !self.uses_symbolic_access(sym_addr.as_ref()) {
            self.memory.concretize(addr, ty.size_of(concrete));
            return;
        }
        if ty.is_struct() {
            warn!(
                "aggregate store of {} bytes at 0x{:x} in object [0x{:x}, 0x{:x}) is not logged",
                concrete,
                addr,
                self.start,
                self.end()
            );
            self.memory.concretize(addr, ty.size_of(concrete));
            return;
        }
        let value = SymbolicExpr::new_concrete(ty, concrete);
        self.writes.push((Self::address_expr(sym_addr, addr), value));
    }

    pub fn append_vars(&self, vars: &mut BTreeSet<VarId>) {
        self.memory.append_vars(vars);
        for (addr, value) in &self.writes {
            addr.append_vars(vars);
            value.append_vars(vars);
        }
    }
}
