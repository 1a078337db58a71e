/// Focuses on the arithmetic callbacks of the instrumentation: unary, binary and pointer operators
/// plus the concrete fallback for operators the symbolic model does not cover.

use log::debug;

use crate::concolic::executor::{ConcolicExecutor, StackElem};

use super::ops::{BinaryOp, PointerOp, UnaryOp, Value, ValueType};
use super::symbolic_expr::SymbolicExpr;

// Stack: [.., a] -> [.., op a]
pub fn handle_apply_unary(executor: &mut ConcolicExecutor, op: UnaryOp, ty: ValueType, value: Value) {
    let operand = executor.pop("unary operator");
    let expr = operand
        .into_symbolic()
        .map(|child| SymbolicExpr::new_unary(ty, value, op, child));
    if let Some(expr) = &expr {
        debug!("unary {:?} -> {}", op, expr);
    }
    executor.push(expr, ty, value);
}

// Stack: [.., a, b] -> [.., a op b]
pub fn handle_apply_binary(executor: &mut ConcolicExecutor, op: BinaryOp, ty: ValueType, value: Value) {
    let right = executor.pop("binary operator");
    let left = executor.pop("binary operator");
    if !left.is_symbolic() && !right.is_symbolic() {
        executor.push_concrete(ty, value);
        return;
    }
    assert!(
        !(op.is_shift() && right.is_symbolic()),
        "shift by a symbolic amount is not supported"
    );
    let expr = SymbolicExpr::new_binary(ty, value, op, left.into_expr(), right.into_expr());
    debug!("binary {:?} -> {}", op, expr);
    executor.push(Some(expr), ty, value);
}

// Stack: [.., a, b] -> [.., value]
pub fn handle_apply_concrete(executor: &mut ConcolicExecutor, ty: ValueType, value: Value) {
    executor.pop("concrete operator");
    executor.pop("concrete operator");
    executor.push_concrete(ty, value);
}

// Widen a pointer offset to a 64-bit integer and multiply it by the pointee size.
fn scale_up_by(operand: StackElem, signed: bool, size: usize) -> StackElem {
    let ty = if signed { ValueType::Long } else { ValueType::ULong };
    let widened_value = operand.concrete;
    let concrete = widened_value.wrapping_mul(size as Value);
    let expr = operand.into_symbolic().map(|expr| {
        let widened = if expr.size() != ty.size() {
            let cast = if signed { UnaryOp::SignedCast } else { UnaryOp::UnsignedCast };
            SymbolicExpr::new_unary(ty, widened_value, cast, expr)
        } else {
            expr
        };
        if size > 1 {
            SymbolicExpr::new_binary(ty, concrete, BinaryOp::Multiply, widened, SymbolicExpr::new_concrete(ty, size as Value))
        } else {
            widened
        }
    });
    StackElem { expr, ty, concrete }
}

// Stack: [.., pointer, index or pointer] -> [.., result]
pub fn handle_apply_pointer(executor: &mut ConcolicExecutor, op: PointerOp, size: usize, value: Value) {
    let right = executor.pop("pointer operator");
    let left = executor.pop("pointer operator");
    let ty = if op == PointerOp::SubtractPP { ValueType::Long } else { ValueType::ULong };
    if !left.is_symbolic() && !right.is_symbolic() {
        executor.push_concrete(ty, value);
        return;
    }

    if op == PointerOp::SubtractPP {
        let difference = left.concrete.wrapping_sub(right.concrete);
        let mut expr = SymbolicExpr::new_binary(ty, difference, BinaryOp::Subtract, left.into_expr(), right.into_expr());
        if size > 1 {
            assert!(
                size.is_power_of_two(),
                "pointer difference over elements of {} bytes is not a power-of-two shift",
                size
            );
            let shift = SymbolicExpr::new_concrete(ty, size.trailing_zeros() as Value);
            expr = SymbolicExpr::new_binary(ty, value, BinaryOp::SShiftR, expr, shift);
        }
        debug!("pointer {:?} -> {}", op, expr);
        executor.push(Some(expr), ty, value);
        return;
    }

    let right = scale_up_by(right, op.has_signed_index(), size);
    let bin_op = if op.is_add() { BinaryOp::Add } else { BinaryOp::Subtract };
    let expr = SymbolicExpr::new_binary(ty, value, bin_op, left.into_expr(), right.into_expr());
    debug!("pointer {:?} -> {}", op, expr);
    executor.push(Some(expr), ty, value);
}
