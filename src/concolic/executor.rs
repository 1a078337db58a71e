/// Symbolic interpreter shadowing the concrete stack machine of the instrumented program.
/// Arithmetic lives in `executor_int`, branch handling in `executor_bool`.

use std::fmt;

use log::{debug, trace};

use crate::state::concrete_memory::{ConcreteMemory, MemoryImage};
use crate::state::object_tracker::ObjectTracker;
use crate::state::symbolic_memory::SymbolicMemory;

use super::ops::{Addr, FunctionId, Value, ValueType, VarId, CALL_ID, RETURN_ID};
use super::symbolic_expr::SymbolicExpr;
use super::trace::ExecutionTrace;

/// One operand stack entry: an optional symbolic expression paired with the concrete value.
#[derive(Clone, Debug, PartialEq)]
pub struct StackElem {
    pub expr: Option<SymbolicExpr>,
    pub ty: ValueType,
    pub concrete: Value,
}

impl StackElem {
    pub fn concrete(ty: ValueType, concrete: Value) -> Self {
        StackElem { expr: None, ty, concrete }
    }

    pub fn is_symbolic(&self) -> bool {
        self.expr.as_ref().map_or(false, |expr| !expr.is_concrete())
    }

    /// The symbolic expression if there is one, otherwise the concrete value as a constant.
    pub fn into_expr(self) -> SymbolicExpr {
        match self.expr {
            Some(expr) if !expr.is_concrete() => expr,
            _ => SymbolicExpr::new_concrete(self.ty, self.concrete),
        }
    }

    pub fn into_symbolic(self) -> Option<SymbolicExpr> {
        self.expr.filter(|expr| !expr.is_concrete())
    }
}

/// Represents the concolic executor
pub struct ConcolicExecutor {
    pub stack: Vec<StackElem>,
    pub memory: SymbolicMemory,
    pub objects: ObjectTracker,
    pub trace: ExecutionTrace,
    pub num_inputs: VarId,
    pub return_value: bool,
    concrete_memory: Box<dyn ConcreteMemory>,
}

impl ConcolicExecutor {
    /// Executor over an empty concrete memory image, seeded with the inputs of the previous run.
    pub fn new(inputs: Vec<Value>) -> Self {
        Self::with_concrete_memory(inputs, Box::new(MemoryImage::new()))
    }

    pub fn with_concrete_memory(inputs: Vec<Value>, concrete_memory: Box<dyn ConcreteMemory>) -> Self {
        ConcolicExecutor {
            stack: Vec::new(),
            memory: SymbolicMemory::new(),
            objects: ObjectTracker::new(),
            trace: ExecutionTrace::new(inputs),
            num_inputs: 0,
            return_value: false,
            concrete_memory,
        }
    }

    pub fn concrete_memory(&self) -> &dyn ConcreteMemory {
        self.concrete_memory.as_ref()
    }

    pub fn into_trace(self) -> ExecutionTrace {
        self.trace
    }

    pub fn push(&mut self, expr: Option<SymbolicExpr>, ty: ValueType, concrete: Value) {
        let expr = expr.filter(|expr| !expr.is_concrete());
        self.stack.push(StackElem { expr, ty, concrete });
    }

    pub fn push_concrete(&mut self, ty: ValueType, concrete: Value) {
        self.stack.push(StackElem::concrete(ty, concrete));
    }

    // Pop an operand; an empty stack means the shadow stack lost sync with the program.
    pub fn pop(&mut self, operation: &str) -> StackElem {
        match self.stack.pop() {
            Some(elem) => elem,
            None => panic!("operand stack underflow in {}", operation),
        }
    }

    // Symbolic view of `addr`: the owning object if one is tracked, the flat memory otherwise.
    fn read(&self, addr: Addr, ty: ValueType, concrete: Value) -> Option<SymbolicExpr> {
        match self.objects.find(addr) {
            Some(object) => object.read(addr, ty, concrete, self.concrete_memory.as_ref()),
            None => self.memory.read(addr, ty, concrete),
        }
    }

    pub fn handle_load(&mut self, addr: Addr, ty: ValueType, concrete: Value) {
        let expr = self.read(addr, ty, concrete);
        trace!("load 0x{:x} {} = {} ({})", addr, ty, concrete, expr.is_some());
        self.push(expr, ty, concrete);
    }

    pub fn handle_deref(&mut self, addr: Addr, ty: ValueType, concrete: Value) {
        let address = self.pop("deref");
        let expr = match (address.into_symbolic(), self.objects.find(addr)) {
            (Some(sym_addr), Some(object)) if !ty.is_struct() => {
                let bytes = self.concrete_memory.read_bytes(object.start(), object.size());
                debug!("deref through symbolic address {} into [0x{:x}, 0x{:x})", sym_addr, object.start(), object.end());
                Some(SymbolicExpr::new_deref(ty, concrete, object.clone(), sym_addr, bytes))
            }
            _ => self.read(addr, ty, concrete),
        };
        self.push(expr, ty, concrete);
    }

    pub fn handle_store(&mut self, addr: Addr) {
        let elem = self.pop("store");
        trace!("store 0x{:x} {} = {}", addr, elem.ty, elem.concrete);
        let (ty, concrete) = (elem.ty, elem.concrete);
        match (self.objects.find_mut(addr), elem.into_symbolic()) {
            (Some(object), Some(expr)) => object.write(None, addr, expr),
            (Some(object), None) => object.concretize(None, addr, ty, concrete),
            (None, Some(expr)) => self.memory.write(addr, expr),
            (None, None) => self.memory.concretize(addr, ty.size_of(concrete)),
        }
    }

    // Stack: [.., dest address, value] -> [..]
    pub fn handle_write(&mut self, addr: Addr) {
        let value = self.pop("write");
        let dest = self.pop("write");
        trace!("write 0x{:x} {} = {}", addr, value.ty, value.concrete);
        let sym_addr = dest.into_symbolic();
        let (ty, concrete) = (value.ty, value.concrete);
        match (self.objects.find_mut(addr), value.into_symbolic()) {
            (Some(object), Some(expr)) => object.write(sym_addr, addr, expr),
            (Some(object), None) => object.concretize(sym_addr, addr, ty, concrete),
            (None, Some(expr)) => self.memory.write(addr, expr),
            (None, None) => self.memory.concretize(addr, ty.size_of(concrete)),
        }
    }

    pub fn handle_clear_stack(&mut self) {
        trace!("clear stack ({} entries)", self.stack.len());
        self.stack.clear();
        // A discarded result leaves nothing for the next call site to keep.
        self.return_value = false;
    }

    pub fn handle_call(&mut self, fid: FunctionId) {
        trace!("call {}", fid);
        self.trace.push_branch(CALL_ID, None);
    }

    pub fn handle_return(&mut self) {
        assert!(
            self.stack.len() <= 1,
            "return with {} operands on the stack",
            self.stack.len()
        );
        self.trace.push_branch(RETURN_ID, None);
        self.return_value = self.stack.len() == 1;
    }

    /// Called after every call site. Without an instrumented return the stack still holds the
    /// call's arguments, which are replaced by the concrete result.
    pub fn handle_return_value(&mut self, ty: ValueType, concrete: Value) {
        if self.return_value {
            self.return_value = false;
            return;
        }
        self.stack.clear();
        self.push_concrete(ty, concrete);
    }

    /// Declare the next input variable, install its symbol at `addr` and return the concrete value
    /// the program should use.
    pub fn handle_new_input(&mut self, ty: ValueType, addr: Addr) -> Value {
        assert!(!ty.is_struct(), "symbolic input of aggregate type at 0x{:x}", addr);
        let var = self.num_inputs;
        self.num_inputs += 1;
        self.trace.declare_var(var, ty);
        let value = ty.normalize(self.trace.input_or_default(var as usize));
        let symbol = SymbolicExpr::new_symbol(ty, value, var);
        debug!("new input x{} : {} = {} at 0x{:x}", var, ty, value, addr);
        match self.objects.find_mut(addr) {
            Some(object) => object.write(None, addr, symbol),
            None => self.memory.write(addr, symbol),
        }
        value
    }

    pub fn handle_alloc(&mut self, addr: Addr, size: usize) {
        self.objects.add(addr, size);
    }

    pub fn handle_free(&mut self, addr: Addr) {
        self.objects.remove(addr);
    }

    pub fn handle_reg_global(&mut self, addr: Addr, size: usize) {
        self.objects.add(addr, size);
    }

    pub fn dump(&self) {
        trace!("{}", self);
    }
}

impl fmt::Display for ConcolicExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "stack:")?;
        for elem in &self.stack {
            match &elem.expr {
                Some(expr) => writeln!(f, "  {} {} : {}", elem.ty, elem.concrete, expr)?,
                None => writeln!(f, "  {} {}", elem.ty, elem.concrete)?,
            }
        }
        writeln!(f, "memory:")?;
        write!(f, "{}", self.memory.dump())?;
        writeln!(f, "objects:")?;
        write!(f, "{}", self.objects.dump())
    }
}
