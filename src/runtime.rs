/// Instrumentation call surface. The instrumented program calls these entry points with raw type
/// and operator codes; the runtime decodes them and drives the executor.

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::concolic::executor::ConcolicExecutor;
use crate::concolic::executor_bool::{handle_apply_compare, handle_branch};
use crate::concolic::executor_int::{handle_apply_binary, handle_apply_concrete, handle_apply_pointer, handle_apply_unary};
use crate::concolic::ops::{Addr, BranchId, FunctionId, InstrumentedOp, PointerOp, Value, ValueType};
use crate::concolic::trace::{read_inputs_file, ExecutionTrace};
use crate::logging::Logger;
use crate::state::concrete_memory::ProcessMemory;
use crate::target_info::TargetInfo;

fn decode_type(code: i32) -> ValueType {
    match ValueType::from_code(code) {
        Some(ty) => ty,
        None => panic!("unknown value type code {}", code),
    }
}

fn decode_op(code: i32) -> InstrumentedOp {
    match InstrumentedOp::from_code(code) {
        Some(op) => op,
        None => panic!("unknown operator code {}", code),
    }
}

pub struct Runtime {
    executor: ConcolicExecutor,
    target_info: TargetInfo,
    // Until the first symbolic input is created nothing can be symbolic, so stack bookkeeping is
    // skipped and only the path is recorded.
    pre_symbolic: bool,
}

impl Runtime {
    /// Process start: install logging, read the input file and shadow this process's memory.
    pub fn init(target_info: TargetInfo) -> Result<Self> {
        let logger = Logger::new(target_info.log_path.as_deref(), target_info.level_filter())
            .context("cannot create log file")?;
        if logger.install().is_err() {
            debug!("a logger is already installed");
        }
        let inputs = read_inputs_file(&target_info.input_path)
            .with_context(|| format!("cannot load inputs from {}", target_info.input_path.display()))?;
        info!("starting run with {} inputs", inputs.len());
        let executor = ConcolicExecutor::with_concrete_memory(inputs, Box::new(ProcessMemory));
        Ok(Self::with_executor(target_info, executor))
    }

    pub fn with_executor(target_info: TargetInfo, executor: ConcolicExecutor) -> Self {
        Runtime { executor, target_info, pre_symbolic: true }
    }

    pub fn executor(&self) -> &ConcolicExecutor {
        &self.executor
    }

    pub fn is_pre_symbolic(&self) -> bool {
        self.pre_symbolic
    }

    pub fn reg_global(&mut self, addr: Addr, size: usize) {
        self.executor.handle_reg_global(addr, size);
    }

    pub fn load(&mut self, addr: Addr, ty: i32, value: Value) {
        if !self.pre_symbolic {
            self.executor.handle_load(addr, decode_type(ty), value);
        }
    }

    pub fn deref(&mut self, addr: Addr, ty: i32, value: Value) {
        if !self.pre_symbolic {
            self.executor.handle_deref(addr, decode_type(ty), value);
        }
    }

    pub fn store(&mut self, addr: Addr) {
        if !self.pre_symbolic {
            self.executor.handle_store(addr);
        }
    }

    pub fn write(&mut self, addr: Addr) {
        if !self.pre_symbolic {
            self.executor.handle_write(addr);
        }
    }

    pub fn clear_stack(&mut self) {
        if !self.pre_symbolic {
            self.executor.handle_clear_stack();
        }
    }

    pub fn apply1(&mut self, op: i32, ty: i32, value: Value) {
        if self.pre_symbolic {
            return;
        }
        match decode_op(op) {
            InstrumentedOp::Unary(op) => handle_apply_unary(&mut self.executor, op, decode_type(ty), value),
            other => panic!("{:?} is not a unary operator", other),
        }
    }

    pub fn apply2(&mut self, op: i32, ty: i32, value: Value) {
        if self.pre_symbolic {
            return;
        }
        let ty = decode_type(ty);
        match decode_op(op) {
            InstrumentedOp::Binary(op) => handle_apply_binary(&mut self.executor, op, ty, value),
            InstrumentedOp::Compare(op) => handle_apply_compare(&mut self.executor, op, ty, value),
            InstrumentedOp::Concrete => handle_apply_concrete(&mut self.executor, ty, value),
            other => panic!("{:?} is not a binary operator", other),
        }
    }

    pub fn ptr_apply2(&mut self, op: i32, size: usize, value: Value) {
        if self.pre_symbolic {
            return;
        }
        match decode_op(op) {
            InstrumentedOp::Pointer(op) => handle_apply_pointer(&mut self.executor, op, size, value),
            other => panic!("{:?} is not a pointer operator", other),
        }
    }

    // Signed-index pointer arithmetic has no op code of its own in the call surface.
    pub fn ptr_apply2_signed(&mut self, op: i32, size: usize, value: Value) {
        if self.pre_symbolic {
            return;
        }
        let op = match decode_op(op) {
            InstrumentedOp::Pointer(PointerOp::AddPI) => PointerOp::SAddPI,
            InstrumentedOp::Pointer(PointerOp::SubtractPI) => PointerOp::SSubtractPI,
            other => panic!("{:?} has no signed-index form", other),
        };
        handle_apply_pointer(&mut self.executor, op, size, value);
    }

    pub fn branch(&mut self, branch: BranchId, taken: bool) {
        if self.pre_symbolic {
            // Nothing was pushed for the condition; stand in a concrete one.
            self.executor.push_concrete(ValueType::Int, taken as Value);
        }
        handle_branch(&mut self.executor, branch, taken);
    }

    pub fn call(&mut self, fid: FunctionId) {
        self.executor.handle_call(fid);
    }

    pub fn ret(&mut self) {
        self.executor.handle_return();
    }

    pub fn handle_return(&mut self, ty: i32, value: Value) {
        if !self.pre_symbolic {
            self.executor.handle_return_value(decode_type(ty), value);
        }
    }

    pub fn alloc(&mut self, addr: Addr, size: usize) {
        self.executor.handle_alloc(addr, size);
    }

    pub fn free(&mut self, addr: Addr) {
        self.executor.handle_free(addr);
    }

    fn new_input(&mut self, ty: ValueType, addr: Addr) -> Value {
        if self.pre_symbolic {
            debug!("first symbolic input, leaving pre-symbolic mode");
            self.pre_symbolic = false;
        }
        self.executor.handle_new_input(ty, addr)
    }

    pub fn new_uchar(&mut self, addr: Addr) -> u8 {
        self.new_input(ValueType::UChar, addr) as u8
    }

    pub fn new_char(&mut self, addr: Addr) -> i8 {
        self.new_input(ValueType::Char, addr) as i8
    }

    pub fn new_ushort(&mut self, addr: Addr) -> u16 {
        self.new_input(ValueType::UShort, addr) as u16
    }

    pub fn new_short(&mut self, addr: Addr) -> i16 {
        self.new_input(ValueType::Short, addr) as i16
    }

    pub fn new_uint(&mut self, addr: Addr) -> u32 {
        self.new_input(ValueType::UInt, addr) as u32
    }

    pub fn new_int(&mut self, addr: Addr) -> i32 {
        self.new_input(ValueType::Int, addr) as i32
    }

    /// Process exit: write the execution trace and hand it back.
    pub fn finish(self) -> Result<ExecutionTrace> {
        let trace = self.executor.into_trace();
        if trace.path.is_empty() {
            warn!("run finished without reaching an instrumented branch");
        }
        trace
            .write_to_file(&self.target_info.trace_path)
            .with_context(|| format!("cannot write trace to {}", self.target_info.trace_path.display()))?;
        info!("wrote {} path entries to {}", trace.path.len(), self.target_info.trace_path.display());
        Ok(trace)
    }
}
