/// Lowers expression trees to z3 bit-vector formulas and turns path queries into new inputs.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::error::Error;
use std::fmt;

use log::{debug, warn};
use z3::ast::{Ast, Bool, BV};
use z3::{Config, Context, FuncDecl, SatResult, Solver, Sort};

use crate::state::symbolic_object::SymbolicObject;

use super::ops::{byte_mask, Addr, BinaryOp, CompareOp, UnaryOp, Value, ValueType, VarId};
use super::symbolic_expr::{value_from_le_bytes, SymbolicExpr};

pub type Solution = BTreeMap<VarId, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum EncodeError {
    SymbolicShiftAmount,
    SymbolicExtractOffset,
    ExtractOutOfRange { offset: Value, size: usize, width: u32 },
    InvalidSize(usize),
    AddressOverflow { start: Addr, offset: usize },
    SortMismatch,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::SymbolicShiftAmount => write!(f, "shift by a symbolic amount"),
            EncodeError::SymbolicExtractOffset => write!(f, "extract at a symbolic offset"),
            EncodeError::ExtractOutOfRange { offset, size, width } => {
                write!(f, "extract of {} bytes at offset {} from a {}-bit value", size, offset, width)
            }
            EncodeError::InvalidSize(size) => write!(f, "expression of {} bytes", size),
            EncodeError::AddressOverflow { start, offset } => {
                write!(f, "object slot at 0x{:x} + {} wraps the address space", start, offset)
            }
            EncodeError::SortMismatch => write!(f, "uninterpreted function application is not a bit-vector"),
        }
    }
}

impl Error for EncodeError {}

// Only called on sizes already accepted by `check_size`.
fn bits(size: usize) -> u32 {
    8 * size as u32
}

fn check_size(size: usize) -> Result<usize, EncodeError> {
    if (1..=8).contains(&size) {
        Ok(size)
    } else {
        Err(EncodeError::InvalidSize(size))
    }
}

// Bring a bit-vector to `width` bits by truncation or extension.
fn resize<'ctx>(bv: BV<'ctx>, width: u32, signed: bool) -> BV<'ctx> {
    let current = bv.get_size();
    if current == width {
        bv
    } else if current > width {
        bv.extract(width - 1, 0)
    } else if signed {
        bv.sign_ext(width - current)
    } else {
        bv.zero_ext(width - current)
    }
}

/// Encoder for one query. Input variables are declared lazily as `x<id>`; `Deref` nodes add
/// side conditions that must be asserted together with the encoded constraints.
pub struct ExprEncoder<'ctx> {
    ctx: &'ctx Context,
    vars: BTreeMap<VarId, BV<'ctx>>,
    side_conditions: Vec<Bool<'ctx>>,
    fresh: usize,
}

impl<'ctx> ExprEncoder<'ctx> {
    pub fn new(ctx: &'ctx Context) -> Self {
        ExprEncoder { ctx, vars: BTreeMap::new(), side_conditions: Vec::new(), fresh: 0 }
    }

    pub fn var(&mut self, var: VarId, size: usize) -> BV<'ctx> {
        let ctx = self.ctx;
        self.vars
            .entry(var)
            .or_insert_with(|| BV::new_const(ctx, format!("x{}", var), bits(size)))
            .clone()
    }

    pub fn side_conditions(&self) -> &[Bool<'ctx>] {
        &self.side_conditions
    }

    fn constant(&self, size: usize, value: Value) -> BV<'ctx> {
        BV::from_u64(self.ctx, value as u64 & byte_mask(size), bits(size))
    }

    fn bool_to_bv(&self, cond: &Bool<'ctx>, size: usize) -> BV<'ctx> {
        cond.ite(&self.constant(size, 1), &self.constant(size, 0))
    }

    pub fn encode(&mut self, expr: &SymbolicExpr) -> Result<BV<'ctx>, EncodeError> {
        check_size(expr.size())?;
        match expr {
            SymbolicExpr::Const { size, value } => Ok(self.constant(*size, *value)),
            SymbolicExpr::Symbol { size, var, .. } => {
                let symbol = self.var(*var, *size);
                Ok(resize(symbol, bits(*size), false))
            }
            SymbolicExpr::Unary { op, child, size, .. } => {
                let width = bits(*size);
                let result = match op {
                    UnaryOp::Negate => resize(self.encode(child)?, width, false).bvneg(),
                    UnaryOp::BitwiseNot => resize(self.encode(child)?, width, false).bvnot(),
                    UnaryOp::LogicalNot => {
                        let cond = self.encode_predicate(child)?.not();
                        self.bool_to_bv(&cond, *size)
                    }
                    UnaryOp::UnsignedCast => resize(self.encode(child)?, width, false),
                    UnaryOp::SignedCast => resize(self.encode(child)?, width, true),
                };
                Ok(result)
            }
            SymbolicExpr::Binary { op, left, right, size, .. } => self.encode_binary(*op, left, right, *size),
            SymbolicExpr::Compare { size, .. } => {
                let cond = self.encode_predicate(expr)?;
                Ok(self.bool_to_bv(&cond, *size))
            }
            SymbolicExpr::Deref { addr, object, concrete_bytes, size, .. } => {
                self.encode_deref(addr, object, concrete_bytes, *size)
            }
        }
    }

    fn encode_binary(&mut self, op: BinaryOp, left: &SymbolicExpr, right: &SymbolicExpr, size: usize) -> Result<BV<'ctx>, EncodeError> {
        let width = bits(size);
        match op {
            BinaryOp::Concat => {
                let high = self.encode(left)?;
                let low = self.encode(right)?;
                return Ok(resize(high.concat(&low), width, false));
            }
            BinaryOp::Extract => {
                if !right.is_concrete() {
                    return Err(EncodeError::SymbolicExtractOffset);
                }
                let whole = self.encode(left)?;
                let out_of_range = EncodeError::ExtractOutOfRange { offset: right.value(), size, width: whole.get_size() };
                let low = match u32::try_from(right.value()).ok().and_then(|offset| offset.checked_mul(8)) {
                    Some(low) => low,
                    None => return Err(out_of_range),
                };
                match low.checked_add(width) {
                    Some(end) if end <= whole.get_size() => return Ok(whole.extract(end - 1, low)),
                    _ => return Err(out_of_range),
                }
            }
            _ => {}
        }

        let l = resize(self.encode(left)?, width, false);
        if op.is_shift() {
            if !right.is_concrete() {
                return Err(EncodeError::SymbolicShiftAmount);
            }
            let amount = BV::from_u64(self.ctx, (right.value() as u64).min(width as u64), width);
            return Ok(match op {
                BinaryOp::ShiftL => l.bvshl(&amount),
                BinaryOp::ShiftR => l.bvlshr(&amount),
                _ => l.bvashr(&amount),
            });
        }

        let r = resize(self.encode(right)?, width, false);
        let result = match op {
            BinaryOp::Add => l.bvadd(&r),
            BinaryOp::Subtract => l.bvsub(&r),
            BinaryOp::Multiply => l.bvmul(&r),
            BinaryOp::Div => l.bvudiv(&r),
            BinaryOp::SDiv => l.bvsdiv(&r),
            BinaryOp::Mod => l.bvurem(&r),
            BinaryOp::SMod => l.bvsrem(&r),
            BinaryOp::BitwiseAnd => l.bvand(&r),
            BinaryOp::BitwiseOr => l.bvor(&r),
            BinaryOp::BitwiseXor => l.bvxor(&r),
            BinaryOp::ShiftL | BinaryOp::ShiftR | BinaryOp::SShiftR | BinaryOp::Concat | BinaryOp::Extract => {
                unreachable!("handled above")
            }
        };
        Ok(result)
    }

    /// Encode an expression used as a branch condition.
    pub fn encode_predicate(&mut self, expr: &SymbolicExpr) -> Result<Bool<'ctx>, EncodeError> {
        match expr {
            SymbolicExpr::Compare { op, left, right, .. } => {
                let (l, r) = (self.encode(left)?, self.encode(right)?);
                let width = l.get_size().max(r.get_size());
                let signed = op.is_signed();
                let l = resize(l, width, signed);
                let r = resize(r, width, signed);
                Ok(match op {
                    CompareOp::Eq => l._eq(&r),
                    CompareOp::Neq => l._eq(&r).not(),
                    CompareOp::Gt => l.bvugt(&r),
                    CompareOp::Le => l.bvule(&r),
                    CompareOp::Lt => l.bvult(&r),
                    CompareOp::Ge => l.bvuge(&r),
                    CompareOp::SGt => l.bvsgt(&r),
                    CompareOp::SLe => l.bvsle(&r),
                    CompareOp::SLt => l.bvslt(&r),
                    CompareOp::SGe => l.bvsge(&r),
                })
            }
            SymbolicExpr::Unary { op: UnaryOp::LogicalNot, child, .. } => Ok(self.encode_predicate(child)?.not()),
            _ => {
                let value = self.encode(expr)?;
                let zero = BV::from_u64(self.ctx, 0, value.get_size());
                Ok(value._eq(&zero).not())
            }
        }
    }

    // A dereference through a symbolic address becomes an application of a fresh function that
    // agrees with the object's contents on every aligned slot, overlaid with the logged writes.
    fn encode_deref(&mut self, addr: &SymbolicExpr, object: &SymbolicObject, bytes: &[u8], size: usize) -> Result<BV<'ctx>, EncodeError> {
        let width = bits(size);
        let addr_bv = resize(self.encode(addr)?, 64, false);
        let name = format!("deref!{}", self.fresh);
        self.fresh += 1;
        let addr_sort = Sort::bitvector(self.ctx, 64);
        let value_sort = Sort::bitvector(self.ctx, width);
        let f = FuncDecl::new(self.ctx, name, &[&addr_sort], &value_sort);

        let aligned = size.is_power_of_two() && object.start() % size as Addr == 0;
        if !aligned {
            warn!(
                "object [0x{:x}, 0x{:x}) is not aligned for {}-byte reads, using concrete contents",
                object.start(),
                object.end(),
                size
            );
        }

        let mut in_object = Vec::new();
        let slots = if size == 0 { 0 } else { object.size() / size };
        for slot in 0..slots {
            let offset = slot * size;
            let slot_addr = object
                .start()
                .checked_add(offset as Addr)
                .ok_or(EncodeError::AddressOverflow { start: object.start(), offset })?;
            let concrete = value_from_le_bytes(bytes, offset, size);
            let content = if aligned { object.memory().read_sized(slot_addr, size, concrete) } else { None };
            let content = content.unwrap_or_else(|| SymbolicExpr::new_const(size, concrete));
            let content_bv = resize(self.encode(&content)?, width, false);
            let slot_bv = BV::from_u64(self.ctx, slot_addr, 64);
            let at_slot = f.apply(&[&slot_bv]).as_bv().ok_or(EncodeError::SortMismatch)?;
            self.side_conditions.push(at_slot._eq(&content_bv));
            in_object.push(addr_bv._eq(&slot_bv));
        }
        let refs: Vec<&Bool<'ctx>> = in_object.iter().collect();
        self.side_conditions.push(Bool::or(self.ctx, &refs));

        let mut result = f.apply(&[&addr_bv]).as_bv().ok_or(EncodeError::SortMismatch)?;
        for (write_addr, write_value) in object.writes() {
            if write_value.size() != size {
                warn!(
                    "skipping {}-byte write in object [0x{:x}, 0x{:x}) for a {}-byte read",
                    write_value.size(),
                    object.start(),
                    object.end(),
                    size
                );
                continue;
            }
            let wa = resize(self.encode(write_addr)?, 64, false);
            let wv = resize(self.encode(write_value)?, width, false);
            result = addr_bv._eq(&wa).ite(&wv, &result);
        }
        Ok(result)
    }
}

pub struct Z3Integration {
    context: Context,
}

impl Z3Integration {
    pub fn new() -> Self {
        Self::with_timeout(None)
    }

    /// A solver whose checks give up after `timeout_ms`; a timeout counts as no solution.
    pub fn with_timeout(timeout_ms: Option<u64>) -> Self {
        let mut config = Config::new();
        if let Some(ms) = timeout_ms {
            config.set_timeout_msec(ms);
        }
        let context = Context::new(&config);
        Z3Integration { context }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Find values for `vars` satisfying every constraint.
    pub fn solve(&self, vars: &BTreeMap<VarId, ValueType>, constraints: &[SymbolicExpr]) -> Option<Solution> {
        let solver = Solver::new(&self.context);
        let mut encoder = ExprEncoder::new(&self.context);
        for (var, ty) in vars {
            encoder.var(*var, ty.size());
        }
        for constraint in constraints {
            match encoder.encode_predicate(constraint) {
                Ok(formula) => solver.assert(&formula),
                Err(err) => {
                    warn!("cannot encode constraint {}: {}", constraint, err);
                    return None;
                }
            }
        }
        for condition in encoder.side_conditions() {
            solver.assert(condition);
        }

        match solver.check() {
            SatResult::Sat => {}
            SatResult::Unsat => {
                debug!("query over {} constraints is unsatisfiable", constraints.len());
                return None;
            }
            SatResult::Unknown => {
                debug!("solver returned unknown on {} constraints", constraints.len());
                return None;
            }
        }

        let model = solver.get_model()?;
        let mut solution = Solution::new();
        for (var, ty) in vars {
            let symbol = encoder.var(*var, ty.size());
            let raw = model.eval(&symbol, true).and_then(|value| value.as_u64())?;
            solution.insert(*var, ty.normalize(raw as Value));
        }
        Some(solution)
    }

    /// Solve only the constraints connected to the newest one through shared variables, keeping
    /// the previous values of every other variable.
    pub fn incremental_solve(&self, old_solution: &[Value], vars: &BTreeMap<VarId, ValueType>, constraints: &[SymbolicExpr]) -> Option<Solution> {
        let newest = constraints.last()?;
        let constraint_vars: Vec<BTreeSet<VarId>> = constraints.iter().map(SymbolicExpr::vars).collect();

        let mut related: BTreeSet<VarId> = BTreeSet::new();
        let mut queue: VecDeque<VarId> = newest.vars().into_iter().collect();
        while let Some(var) = queue.pop_front() {
            if !related.insert(var) {
                continue;
            }
            for occurring in constraint_vars.iter().filter(|set| set.contains(&var)) {
                queue.extend(occurring.iter().filter(|other| !related.contains(other)));
            }
        }

        let reduced_vars: BTreeMap<VarId, ValueType> = vars
            .iter()
            .filter(|(var, _)| related.contains(var))
            .map(|(var, ty)| (*var, *ty))
            .collect();
        let reduced: Vec<SymbolicExpr> = constraints
            .iter()
            .filter(|constraint| constraint.depends_on(&reduced_vars))
            .cloned()
            .collect();
        debug!(
            "incremental query keeps {} of {} constraints over {} variables",
            reduced.len(),
            constraints.len(),
            reduced_vars.len()
        );

        let mut solution = self.solve(&reduced_vars, &reduced)?;
        for var in vars.keys() {
            solution
                .entry(*var)
                .or_insert_with(|| old_solution.get(*var as usize).copied().unwrap_or(0));
        }
        Some(solution)
    }
}

impl Default for Z3Integration {
    fn default() -> Self {
        Self::new()
    }
}
