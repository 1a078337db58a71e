/// Symbolic expression DAG: every node carries its byte size and the concrete value observed
/// when it was built, so the concrete run never depends on the solver.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::state::symbolic_object::SymbolicObject;

use super::ops::{byte_mask, sign_extend, Addr, BinaryOp, CompareOp, UnaryOp, Value, ValueType, VarId};

#[derive(Clone, Debug, PartialEq)]
pub enum SymbolicExpr {
    Const {
        size: usize,
        value: Value,
    },
    Symbol {
        size: usize,
        value: Value,
        var: VarId,
    },
    Unary {
        op: UnaryOp,
        child: Box<SymbolicExpr>,
        size: usize,
        value: Value,
    },
    Binary {
        op: BinaryOp,
        left: Box<SymbolicExpr>,
        right: Box<SymbolicExpr>,
        size: usize,
        value: Value,
    },
    Compare {
        op: CompareOp,
        left: Box<SymbolicExpr>,
        right: Box<SymbolicExpr>,
        size: usize,
        value: Value,
    },
    // Read through a symbolic address: `object` is a snapshot taken at the time of the read and
    // `concrete_bytes` holds the object's concrete contents at that moment.
    Deref {
        addr: Box<SymbolicExpr>,
        object: Box<SymbolicObject>,
        concrete_bytes: Vec<u8>,
        size: usize,
        value: Value,
    },
}

impl SymbolicExpr {
    pub fn new_const(size: usize, value: Value) -> Self {
        SymbolicExpr::Const { size, value }
    }

    pub fn new_concrete(ty: ValueType, value: Value) -> Self {
        SymbolicExpr::Const { size: ty.size(), value }
    }

    pub fn new_symbol(ty: ValueType, value: Value, var: VarId) -> Self {
        SymbolicExpr::Symbol { size: ty.size(), value, var }
    }

    pub fn new_unary(ty: ValueType, value: Value, op: UnaryOp, child: SymbolicExpr) -> Self {
        SymbolicExpr::Unary { op, child: Box::new(child), size: ty.size(), value }
    }

    pub fn new_binary(ty: ValueType, value: Value, op: BinaryOp, left: SymbolicExpr, right: SymbolicExpr) -> Self {
        SymbolicExpr::Binary { op, left: Box::new(left), right: Box::new(right), size: ty.size(), value }
    }

    pub fn new_compare(ty: ValueType, value: Value, op: CompareOp, left: SymbolicExpr, right: SymbolicExpr) -> Self {
        SymbolicExpr::Compare { op, left: Box::new(left), right: Box::new(right), size: ty.size(), value }
    }

    pub fn new_deref(ty: ValueType, value: Value, object: SymbolicObject, addr: SymbolicExpr, concrete_bytes: Vec<u8>) -> Self {
        SymbolicExpr::Deref {
            addr: Box::new(addr),
            object: Box::new(object),
            concrete_bytes,
            size: ty.size(),
            value,
        }
    }

    // Deref node whose address is the known constant `addr`.
    pub fn new_const_deref(ty: ValueType, value: Value, object: SymbolicObject, addr: Addr, concrete_bytes: Vec<u8>) -> Self {
        let addr = SymbolicExpr::new_concrete(ValueType::ULong, addr as Value);
        SymbolicExpr::new_deref(ty, value, object, addr, concrete_bytes)
    }

    /// `high` occupies the upper bytes of the result, `low` the lower ones.
    pub fn concatenate(high: SymbolicExpr, low: SymbolicExpr) -> Self {
        let size = high.size() + low.size();
        let raw = if low.size() >= 8 {
            low.value() as u64
        } else {
            ((high.value() as u64) << (8 * low.size())) | (low.value() as u64 & byte_mask(low.size()))
        };
        SymbolicExpr::Binary {
            op: BinaryOp::Concat,
            left: Box::new(high),
            right: Box::new(low),
            size,
            value: (raw & byte_mask(size)) as Value,
        }
    }

    /// Bytes `offset .. offset + size` of `expr`, counted from its least significant byte.
    pub fn extract_bytes(expr: SymbolicExpr, offset: usize, size: usize) -> Self {
        assert!(
            offset + size <= expr.size(),
            "extract of bytes {}..{} out of a {}-byte expression",
            offset,
            offset + size,
            expr.size()
        );
        let value = concrete_slice(expr.value(), offset, size);
        SymbolicExpr::Binary {
            op: BinaryOp::Extract,
            left: Box::new(expr),
            right: Box::new(SymbolicExpr::new_const(8, offset as Value)),
            size,
            value,
        }
    }

    // Constant holding bytes `offset .. offset + size` of a concrete value.
    pub fn concrete_bytes_of(value: Value, offset: usize, size: usize) -> Self {
        SymbolicExpr::new_const(size, concrete_slice(value, offset, size))
    }

    pub fn size(&self) -> usize {
        match self {
            SymbolicExpr::Const { size, .. }
            | SymbolicExpr::Symbol { size, .. }
            | SymbolicExpr::Unary { size, .. }
            | SymbolicExpr::Binary { size, .. }
            | SymbolicExpr::Compare { size, .. }
            | SymbolicExpr::Deref { size, .. } => *size,
        }
    }

    pub fn value(&self) -> Value {
        match self {
            SymbolicExpr::Const { value, .. }
            | SymbolicExpr::Symbol { value, .. }
            | SymbolicExpr::Unary { value, .. }
            | SymbolicExpr::Binary { value, .. }
            | SymbolicExpr::Compare { value, .. }
            | SymbolicExpr::Deref { value, .. } => *value,
        }
    }

    /// True when no input variable occurs anywhere below this node.
    pub fn is_concrete(&self) -> bool {
        match self {
            SymbolicExpr::Const { .. } => true,
            SymbolicExpr::Symbol { .. } | SymbolicExpr::Deref { .. } => false,
            SymbolicExpr::Unary { child, .. } => child.is_concrete(),
            SymbolicExpr::Binary { left, right, .. } | SymbolicExpr::Compare { left, right, .. } => {
                left.is_concrete() && right.is_concrete()
            }
        }
    }

    /// True when the tree mentions any of the variables in `vars`.
    pub fn depends_on(&self, vars: &BTreeMap<VarId, ValueType>) -> bool {
        self.vars().iter().any(|var| vars.contains_key(var))
    }

    pub fn is_compare(&self) -> bool {
        matches!(self, SymbolicExpr::Compare { .. })
    }

    pub fn append_vars(&self, vars: &mut BTreeSet<VarId>) {
        match self {
            SymbolicExpr::Const { .. } => {}
            SymbolicExpr::Symbol { var, .. } => {
                vars.insert(*var);
            }
            SymbolicExpr::Unary { child, .. } => child.append_vars(vars),
            SymbolicExpr::Binary { left, right, .. } | SymbolicExpr::Compare { left, right, .. } => {
                left.append_vars(vars);
                right.append_vars(vars);
            }
            SymbolicExpr::Deref { addr, object, .. } => {
                addr.append_vars(vars);
                object.append_vars(vars);
            }
        }
    }

    pub fn vars(&self) -> BTreeSet<VarId> {
        let mut vars = BTreeSet::new();
        self.append_vars(&mut vars);
        vars
    }

    // Number of nodes in the tree, counting shared subtrees once per occurrence.
    pub fn node_count(&self) -> usize {
        match self {
            SymbolicExpr::Const { .. } | SymbolicExpr::Symbol { .. } => 1,
            SymbolicExpr::Unary { child, .. } => 1 + child.node_count(),
            SymbolicExpr::Binary { left, right, .. } | SymbolicExpr::Compare { left, right, .. } => {
                1 + left.node_count() + right.node_count()
            }
            SymbolicExpr::Deref { addr, .. } => 1 + addr.node_count(),
        }
    }

    /// Logical negation of a branch predicate. Comparisons flip their operator, anything else is
    /// wrapped in a logical not.
    pub fn negate_predicate(self) -> SymbolicExpr {
        let negated_value = (self.value() == 0) as Value;
        match self {
            SymbolicExpr::Compare { op, left, right, size, .. } => SymbolicExpr::Compare {
                op: op.negate(),
                left,
                right,
                size,
                value: negated_value,
            },
            other => {
                let size = other.size();
                SymbolicExpr::Unary {
                    op: UnaryOp::LogicalNot,
                    child: Box::new(other),
                    size,
                    value: negated_value,
                }
            }
        }
    }

    /// Re-evaluate the expression under an assignment of the input variables. Returns the raw bits
    /// of the result masked to its size; variables missing from `assignment` keep the value they
    /// had when the node was built.
    pub fn evaluate(&self, assignment: &BTreeMap<VarId, Value>) -> u64 {
        match self {
            SymbolicExpr::Const { size, value } => *value as u64 & byte_mask(*size),
            SymbolicExpr::Symbol { size, value, var } => {
                let value = assignment.get(var).copied().unwrap_or(*value);
                value as u64 & byte_mask(*size)
            }
            SymbolicExpr::Unary { op, child, size, .. } => {
                let operand = child.evaluate(assignment);
                let raw = match op {
                    UnaryOp::Negate => operand.wrapping_neg(),
                    UnaryOp::BitwiseNot => !operand,
                    UnaryOp::LogicalNot => (operand == 0) as u64,
                    UnaryOp::UnsignedCast => operand,
                    UnaryOp::SignedCast => sign_extend(operand, child.size()) as u64,
                };
                raw & byte_mask(*size)
            }
            SymbolicExpr::Binary { op, left, right, size, .. } => {
                evaluate_binary(*op, left, right, *size, assignment)
            }
            SymbolicExpr::Compare { op, left, right, size, .. } => {
                let width = left.size().max(right.size());
                let (l, r) = if op.is_signed() {
                    (
                        sign_extend(left.evaluate(assignment), left.size()) as u64 & byte_mask(width),
                        sign_extend(right.evaluate(assignment), right.size()) as u64 & byte_mask(width),
                    )
                } else {
                    (left.evaluate(assignment), right.evaluate(assignment))
                };
                op.evaluate(l, r, width) as u64 & byte_mask(*size)
            }
            SymbolicExpr::Deref { addr, object, concrete_bytes, size, .. } => {
                let target = addr.evaluate(assignment);
                for (write_addr, write_value) in object.writes().iter().rev() {
                    if write_value.size() == *size && write_addr.evaluate(assignment) == target {
                        return write_value.evaluate(assignment) & byte_mask(*size);
                    }
                }
                match target.checked_add(*size as u64) {
                    Some(end) if target >= object.start() && end <= object.end() => {}
                    _ => return 0,
                }
                let offset = (target - object.start()) as usize;
                let concrete = value_from_le_bytes(concrete_bytes, offset, *size);
                let content = if size.is_power_of_two() && target % *size as u64 == 0 {
                    object.memory().read_sized(target, *size, concrete)
                } else {
                    None
                };
                match content {
                    Some(content) => content.evaluate(assignment),
                    None => concrete as u64 & byte_mask(*size),
                }
            }
        }
    }
}

fn evaluate_binary(
    op: BinaryOp,
    left: &SymbolicExpr,
    right: &SymbolicExpr,
    size: usize,
    assignment: &BTreeMap<VarId, Value>,
) -> u64 {
    let mask = byte_mask(size);
    let l = left.evaluate(assignment) & mask;
    let r = right.evaluate(assignment) & mask;
    let bits = 8 * size as u64;
    let raw = match op {
        BinaryOp::Add => l.wrapping_add(r),
        BinaryOp::Subtract => l.wrapping_sub(r),
        BinaryOp::Multiply => l.wrapping_mul(r),
        BinaryOp::Div => {
            if r == 0 {
                u64::MAX
            } else {
                l / r
            }
        }
        BinaryOp::Mod => {
            if r == 0 {
                l
            } else {
                l % r
            }
        }
        BinaryOp::SDiv => {
            let (sl, sr) = (sign_extend(l, size), sign_extend(r, size));
            if sr == 0 {
                if sl < 0 {
                    1
                } else {
                    u64::MAX
                }
            } else {
                sl.wrapping_div(sr) as u64
            }
        }
        BinaryOp::SMod => {
            let (sl, sr) = (sign_extend(l, size), sign_extend(r, size));
            if sr == 0 {
                l
            } else {
                sl.wrapping_rem(sr) as u64
            }
        }
        BinaryOp::ShiftL => {
            if r >= bits {
                0
            } else {
                l << r
            }
        }
        BinaryOp::ShiftR => {
            if r >= bits {
                0
            } else {
                l >> r
            }
        }
        BinaryOp::SShiftR => {
            let sl = sign_extend(l, size);
            (sl >> r.min(63)) as u64
        }
        BinaryOp::BitwiseAnd => l & r,
        BinaryOp::BitwiseOr => l | r,
        BinaryOp::BitwiseXor => l ^ r,
        BinaryOp::Concat => {
            let high = left.evaluate(assignment);
            let low = right.evaluate(assignment);
            if right.size() >= 8 {
                low
            } else {
                (high << (8 * right.size())) | low
            }
        }
        BinaryOp::Extract => {
            let whole = left.evaluate(assignment);
            let offset = right.evaluate(assignment);
            if offset >= 8 {
                0
            } else {
                whole >> (8 * offset)
            }
        }
    };
    raw & mask
}

// Bytes `offset .. offset + size` of a little-endian concrete value.
fn concrete_slice(value: Value, offset: usize, size: usize) -> Value {
    let shifted = if offset >= 8 { 0 } else { (value as u64) >> (8 * offset) };
    (shifted & byte_mask(size)) as Value
}

/// Little-endian value of `size` bytes starting at `offset`; missing bytes read as zero.
pub fn value_from_le_bytes(bytes: &[u8], offset: usize, size: usize) -> Value {
    let mut raw = 0u64;
    for i in (0..size.min(8)).rev() {
        let byte = bytes.get(offset + i).copied().unwrap_or(0);
        raw = (raw << 8) | byte as u64;
    }
    raw as Value
}

impl fmt::Display for SymbolicExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolicExpr::Const { value, .. } => write!(f, "{}", value),
            SymbolicExpr::Symbol { var, .. } => write!(f, "x{}", var),
            SymbolicExpr::Unary { op, child, .. } => write!(f, "({} {})", op.symbol(), child),
            SymbolicExpr::Binary { op, left, right, .. } => write!(f, "({} {} {})", op.symbol(), left, right),
            SymbolicExpr::Compare { op, left, right, .. } => write!(f, "({} {} {})", op.symbol(), left, right),
            SymbolicExpr::Deref { addr, object, size, .. } => {
                write!(f, "(*{} {} [0x{:x}, 0x{:x}))", size, addr, object.start(), object.end())
            }
        }
    }
}
