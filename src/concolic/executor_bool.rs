/// Focuses on comparisons and conditional branches, the only places where path constraints are
/// produced.

use log::debug;

use crate::concolic::executor::ConcolicExecutor;

use super::ops::{BranchId, CompareOp, Value, ValueType};
use super::symbolic_expr::SymbolicExpr;

// Stack: [.., a, b] -> [.., a op b]
pub fn handle_apply_compare(executor: &mut ConcolicExecutor, op: CompareOp, ty: ValueType, value: Value) {
    let right = executor.pop("comparison");
    let left = executor.pop("comparison");
    if !left.is_symbolic() && !right.is_symbolic() {
        executor.push_concrete(ty, value);
        return;
    }
    let expr = SymbolicExpr::new_compare(ty, value, op, left.into_expr(), right.into_expr());
    debug!("compare {:?} -> {}", op, expr);
    executor.push(Some(expr), ty, value);
}

/// Turn a symbolic branch condition into the comparison that held on this run.
pub fn normalize_predicate(condition: SymbolicExpr, taken: bool) -> SymbolicExpr {
    if condition.is_compare() {
        return if taken { condition } else { condition.negate_predicate() };
    }
    let zero = SymbolicExpr::new_const(condition.size(), 0);
    let op = if taken { CompareOp::Neq } else { CompareOp::Eq };
    SymbolicExpr::new_compare(ValueType::Int, 1, op, condition, zero)
}

// Stack: [condition] -> []
pub fn handle_branch(executor: &mut ConcolicExecutor, branch: BranchId, taken: bool) {
    assert_eq!(
        executor.stack.len(),
        1,
        "branch {} expects exactly one operand on the stack",
        branch
    );
    let condition = executor.pop("branch");
    let predicate = condition
        .into_symbolic()
        .map(|condition| normalize_predicate(condition, taken));
    if let Some(predicate) = &predicate {
        debug!("branch {} taken={} : {} ({} nodes)", branch, taken, predicate, predicate.node_count());
    }
    executor.trace.push_branch(branch, predicate);
}
