use crest::concolic::executor_bool::{handle_apply_compare, handle_branch};
use crest::concolic::executor_int::{handle_apply_binary, handle_apply_pointer};
use crest::concolic::ops::{BinaryOp, CompareOp, PointerOp, ValueType};
use crest::concolic::{ConcolicExecutor, SymbolicExpr, Z3Integration};
use crest::state::{MemoryImage, SymbolicObject};

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn setup_executor() -> ConcolicExecutor {
        ConcolicExecutor::new(vec![0])
    }

    fn int_var(var: u32) -> SymbolicExpr {
        SymbolicExpr::new_symbol(ValueType::Int, 0, var)
    }

    fn int(value: i64) -> SymbolicExpr {
        SymbolicExpr::new_concrete(ValueType::Int, value)
    }

    fn compare(op: CompareOp, left: SymbolicExpr, right: SymbolicExpr) -> SymbolicExpr {
        SymbolicExpr::new_compare(ValueType::Int, 0, op, left, right)
    }

    fn holds(constraint: &SymbolicExpr, solution: &BTreeMap<u32, i64>) -> bool {
        constraint.evaluate(solution) != 0
    }

    #[test]
    fn test_end_to_end_doubling_branch() {
        // if (x * 2 > 10) with x = 0 on the first run
        let mut executor = setup_executor();
        let x = executor.handle_new_input(ValueType::Int, 0x1000);
        assert_eq!(x, 0);
        executor.handle_load(0x1000, ValueType::Int, x);
        executor.handle_load(0x2000, ValueType::Int, 2);
        handle_apply_binary(&mut executor, BinaryOp::Multiply, ValueType::Int, 0);
        assert_eq!(
            executor.stack[0].expr,
            Some(SymbolicExpr::new_binary(
                ValueType::Int,
                0,
                BinaryOp::Multiply,
                SymbolicExpr::new_symbol(ValueType::Int, 0, 0),
                int(2),
            ))
        );
        executor.handle_load(0x2004, ValueType::Int, 10);
        handle_apply_compare(&mut executor, CompareOp::SGt, ValueType::Int, 0);
        handle_branch(&mut executor, 1, false);

        let trace = executor.into_trace();
        let query = trace.flip(0).expect("one symbolic branch");
        match &query[0] {
            SymbolicExpr::Compare { op, .. } => assert_eq!(*op, CompareOp::SGt),
            other => panic!("expected a comparison, got {}", other),
        }

        let z3 = Z3Integration::new();
        let solution = z3.solve(&trace.vars, &query).expect("x * 2 > 10 is satisfiable");
        let x = solution[&0] as i32;
        assert!(x.wrapping_mul(2) > 10, "x = {} does not take the branch", x);
        assert!(holds(&query[0], &solution));
    }

    #[test]
    fn test_unsat_gives_no_solution() {
        let vars: BTreeMap<u32, ValueType> = [(0, ValueType::Int)].into_iter().collect();
        let constraints = vec![
            compare(CompareOp::SGt, int_var(0), int(5)),
            compare(CompareOp::SLt, int_var(0), int(3)),
        ];
        assert!(Z3Integration::new().solve(&vars, &constraints).is_none());
    }

    #[test]
    fn test_signed_values_are_sign_extended() {
        let vars: BTreeMap<u32, ValueType> = [(0, ValueType::Char)].into_iter().collect();
        let x = SymbolicExpr::new_symbol(ValueType::Char, 0, 0);
        let constraints = vec![
            SymbolicExpr::new_compare(ValueType::Int, 0, CompareOp::SLt, x.clone(), SymbolicExpr::new_concrete(ValueType::Char, -100)),
            SymbolicExpr::new_compare(ValueType::Int, 0, CompareOp::SGt, x, SymbolicExpr::new_concrete(ValueType::Char, -102)),
        ];
        let solution = Z3Integration::new().solve(&vars, &constraints).expect("x = -101");
        assert_eq!(solution[&0], -101);
    }

    #[test]
    fn test_mixed_width_comparison() {
        // (long) c == 200 for an unsigned char c
        let vars: BTreeMap<u32, ValueType> = [(0, ValueType::UChar)].into_iter().collect();
        let c = SymbolicExpr::new_symbol(ValueType::UChar, 0, 0);
        let constraints = vec![SymbolicExpr::new_compare(
            ValueType::Int,
            0,
            CompareOp::Eq,
            c,
            SymbolicExpr::new_concrete(ValueType::Long, 200),
        )];
        let solution = Z3Integration::new().solve(&vars, &constraints).expect("c = 200");
        assert_eq!(solution[&0], 200);
    }

    #[test]
    fn test_symbolic_shift_amount_gives_no_solution() {
        let vars: BTreeMap<u32, ValueType> = [(0, ValueType::Int)].into_iter().collect();
        let shifted = SymbolicExpr::new_binary(ValueType::Int, 1, BinaryOp::ShiftL, int(1), int_var(0));
        let constraints = vec![compare(CompareOp::Eq, shifted, int(8))];
        assert!(Z3Integration::new().solve(&vars, &constraints).is_none());
    }

    #[test]
    fn test_incremental_solve_keeps_unrelated_values() {
        let vars: BTreeMap<u32, ValueType> = [(0, ValueType::Int), (1, ValueType::Int), (2, ValueType::Int)]
            .into_iter()
            .collect();
        let sum = SymbolicExpr::new_binary(ValueType::Int, 0, BinaryOp::Add, int_var(1), int_var(2));
        let constraints = vec![
            compare(CompareOp::SGt, int_var(0), int(100)),
            compare(CompareOp::Eq, int_var(1), int(4)),
            compare(CompareOp::Eq, sum, int(10)),
        ];
        let old = vec![500, 4, 1];
        let solution = Z3Integration::new()
            .incremental_solve(&old, &vars, &constraints)
            .expect("x1 = 4, x2 = 6");
        // x0 does not share a constraint with the newest one and keeps its value.
        assert_eq!(solution[&0], 500);
        assert_eq!(solution[&1], 4);
        assert_eq!(solution[&2], 6);
        for constraint in &constraints {
            assert!(holds(constraint, &solution), "{} violated", constraint);
        }
    }

    #[test]
    fn test_incremental_solve_satisfies_every_prefix() {
        let vars: BTreeMap<u32, ValueType> = (0..4).map(|var| (var, ValueType::Int)).collect();
        let constraints = vec![
            compare(CompareOp::SGt, int_var(0), int_var(1)),
            compare(CompareOp::SLt, int_var(1), int(-7)),
            compare(CompareOp::Neq, int_var(2), int(0)),
            compare(CompareOp::Eq, int_var(3), int_var(0)),
        ];
        let old = vec![0, -8, 1, 0];
        let z3 = Z3Integration::new();
        for k in 1..=constraints.len() {
            let prefix = &constraints[..k];
            let solution = z3.incremental_solve(&old, &vars, prefix).expect("satisfiable prefix");
            for constraint in prefix {
                assert!(holds(constraint, &solution), "{} violated at k = {}", constraint, k);
            }
        }
    }

    #[test]
    fn test_incremental_solve_with_missing_old_values() {
        let vars: BTreeMap<u32, ValueType> = [(0, ValueType::Int), (1, ValueType::Int)].into_iter().collect();
        let constraints = vec![compare(CompareOp::Eq, int_var(1), int(3))];
        let solution = Z3Integration::new().incremental_solve(&[], &vars, &constraints).expect("x1 = 3");
        assert_eq!(solution[&0], 0);
        assert_eq!(solution[&1], 3);
    }

    #[test]
    fn test_solve_through_symbolic_array_index() {
        // int a[4] = {10, 20, 30, 40}; if (a[i] == 30)
        let mut image = MemoryImage::new();
        for (k, value) in [10i64, 20, 30, 40].iter().enumerate() {
            image.write_value(0x8000 + 4 * k as u64, 4, *value);
        }
        let mut executor = ConcolicExecutor::with_concrete_memory(vec![0], Box::new(image));
        executor.handle_alloc(0x8000, 16);
        executor.handle_new_input(ValueType::Int, 0x1000);

        executor.handle_load(0x3000, ValueType::ULong, 0x8000);
        executor.handle_load(0x1000, ValueType::Int, 0);
        handle_apply_pointer(&mut executor, PointerOp::AddPI, 4, 0x8000);
        executor.handle_deref(0x8000, ValueType::Int, 10);
        executor.handle_load(0x2000, ValueType::Int, 30);
        handle_apply_compare(&mut executor, CompareOp::Eq, ValueType::Int, 0);
        handle_branch(&mut executor, 9, false);

        let trace = executor.into_trace();
        let query = trace.flip(0).expect("one symbolic branch");
        let solution = Z3Integration::new().solve(&trace.vars, &query).expect("i = 2");
        assert_eq!(solution[&0], 2);
        assert!(holds(&query[0], &solution));
    }

    #[test]
    fn test_solve_through_symbolic_write() {
        // a[j] = 99; if (a[i] == 99) with i = j = 0 on the first run
        let mut image = MemoryImage::new();
        for (k, value) in [99i64, 20, 30, 40].iter().enumerate() {
            image.write_value(0x8000 + 4 * k as u64, 4, *value);
        }
        let mut executor = ConcolicExecutor::with_concrete_memory(vec![0, 0], Box::new(image));
        executor.handle_alloc(0x8000, 16);
        executor.handle_new_input(ValueType::Int, 0x1000);
        executor.handle_new_input(ValueType::Int, 0x1004);

        executor.handle_load(0x3000, ValueType::ULong, 0x8000);
        executor.handle_load(0x1004, ValueType::Int, 0);
        handle_apply_pointer(&mut executor, PointerOp::AddPI, 4, 0x8000);
        executor.handle_load(0x2000, ValueType::Int, 99);
        executor.handle_write(0x8000);

        executor.handle_load(0x3000, ValueType::ULong, 0x8000);
        executor.handle_load(0x1000, ValueType::Int, 0);
        handle_apply_pointer(&mut executor, PointerOp::AddPI, 4, 0x8000);
        executor.handle_deref(0x8000, ValueType::Int, 99);
        executor.handle_load(0x2004, ValueType::Int, 99);
        handle_apply_compare(&mut executor, CompareOp::Eq, ValueType::Int, 1);
        handle_branch(&mut executor, 9, true);

        let trace = executor.into_trace();
        let query = trace.flip(0).expect("one symbolic branch");
        let solution = Z3Integration::new().solve(&trace.vars, &query).expect("i != j");
        let (i, j) = (solution[&0], solution[&1]);
        assert!((0..4).contains(&i), "i = {} is outside the array", i);
        assert_ne!(i, j);
    }

    #[test]
    fn test_depends_on_declared_variables() {
        let sum = SymbolicExpr::new_binary(ValueType::Int, 0, BinaryOp::Add, int_var(1), int_var(2));
        let only_x0: BTreeMap<u32, ValueType> = [(0, ValueType::Int)].into_iter().collect();
        let with_x2: BTreeMap<u32, ValueType> = [(0, ValueType::Int), (2, ValueType::Int)].into_iter().collect();
        assert!(!sum.depends_on(&only_x0));
        assert!(sum.depends_on(&with_x2));
        assert!(!int(5).depends_on(&with_x2));
    }

    #[test]
    fn test_malformed_extract_gives_no_solution() {
        // Such nodes only arrive through a hand-edited or corrupt trace.
        let vars: BTreeMap<u32, ValueType> = [(0, ValueType::Int)].into_iter().collect();
        let extract = SymbolicExpr::Binary {
            op: BinaryOp::Extract,
            left: Box::new(int_var(0)),
            right: Box::new(SymbolicExpr::new_const(8, 0x2000_0000)),
            size: 4,
            value: 0,
        };
        let constraints = vec![compare(CompareOp::Eq, extract, int(1))];
        assert!(Z3Integration::new().solve(&vars, &constraints).is_none());
    }

    #[test]
    fn test_zero_sized_node_gives_no_solution() {
        let vars: BTreeMap<u32, ValueType> = [(0, ValueType::Int)].into_iter().collect();
        let constraints = vec![compare(CompareOp::Eq, int_var(0), SymbolicExpr::new_const(0, 0))];
        assert!(Z3Integration::new().solve(&vars, &constraints).is_none());
    }

    #[test]
    fn test_deref_near_end_of_address_space_evaluates_to_zero() {
        let object = SymbolicObject::new(0x8000, 16);
        let deref = SymbolicExpr::new_deref(
            ValueType::Int,
            0,
            object,
            SymbolicExpr::new_symbol(ValueType::ULong, 0x8000, 0),
            vec![0; 16],
        );
        let assignment: BTreeMap<u32, i64> = [(0, -2)].into_iter().collect();
        assert_eq!(deref.evaluate(&assignment), 0);
    }
}
