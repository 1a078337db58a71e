use crest::concolic::ops::{BinaryOp, ValueType};
use crest::concolic::SymbolicExpr;
use crest::state::SymbolicMemory;

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn type_of_size(size: usize) -> ValueType {
        match size {
            1 => ValueType::UChar,
            2 => ValueType::UShort,
            4 => ValueType::UInt,
            _ => ValueType::ULong,
        }
    }

    fn symbol(size: usize, var: u32) -> SymbolicExpr {
        SymbolicExpr::new_symbol(type_of_size(size), 0x5a, var)
    }

    #[test]
    fn test_read_returns_written_expression() {
        for size in [1usize, 2, 4, 8] {
            for base in [0x1000u64, 0x7fff_fff0, 0xdead_bee8] {
                for slot in 0..(8 / size) {
                    let addr = base + (slot * size) as u64;
                    let mut memory = SymbolicMemory::new();
                    let expr = symbol(size, 3);
                    memory.write(addr, expr.clone());
                    for concrete in [0i64, -1, 0x1234] {
                        assert_eq!(memory.read(addr, type_of_size(size), concrete), Some(expr.clone()));
                    }
                }
            }
        }
    }

    #[test]
    fn test_read_after_write_replaces_smaller_entries() {
        let mut memory = SymbolicMemory::new();
        memory.write(0x2000, symbol(1, 0));
        memory.write(0x2001, symbol(1, 1));
        memory.write(0x2004, symbol(2, 2));
        let wide = symbol(8, 9);
        memory.write(0x2000, wide.clone());
        assert_eq!(memory.read(0x2000, ValueType::Long, 0), Some(wide));
    }

    #[test]
    fn test_concretize_makes_range_concrete() {
        for size in [1usize, 2, 4, 8] {
            let mut memory = SymbolicMemory::new();
            memory.write(0x3000, symbol(8, 0));
            memory.concretize(0x3000, size);
            assert_eq!(memory.read_sized(0x3000, size, 7), None);
        }
        let mut memory = SymbolicMemory::new();
        memory.write(0x3000, symbol(4, 0));
        memory.concretize(0x3000, 4);
        assert!(memory.is_empty());
    }

    #[test]
    fn test_concretize_unaligned_span() {
        let mut memory = SymbolicMemory::new();
        for i in 0..8u64 {
            memory.write(0x4000 + 8 * i, symbol(8, i as u32));
        }
        // Bytes 0x4003 .. 0x4035 become concrete; 0x4000..0x4003 and 0x4035..0x4040 stay symbolic.
        memory.concretize(0x4003, 0x32);
        assert!(memory.read_sized(0x4000, 1, 0).is_some());
        assert!(memory.read_sized(0x4002, 1, 0).is_some());
        assert_eq!(memory.read_sized(0x4003, 1, 0), None);
        assert_eq!(memory.read_sized(0x4010, 8, 0), None);
        assert_eq!(memory.read_sized(0x4034, 1, 0), None);
        assert!(memory.read_sized(0x4035, 1, 0).is_some());
        assert!(memory.read_sized(0x4038, 8, 0).is_some());
    }

    #[test]
    fn test_concretize_skips_untracked_slabs() {
        let mut memory = SymbolicMemory::new();
        memory.write(0x10_0000, symbol(4, 0));
        memory.concretize(0x8000, 0x10_0000 - 0x8000 + 2);
        let remaining = memory.read(0x10_0000, ValueType::UInt, 0).expect("upper bytes stay symbolic");
        assert_eq!(remaining.size(), 4);
        assert!(!remaining.is_concrete());
    }

    #[test]
    fn test_partial_overwrite_keeps_other_bytes() {
        let mut memory = SymbolicMemory::new();
        let original = SymbolicExpr::new_symbol(ValueType::UInt, 0, 0);
        memory.write(0x5000, original);
        memory.concretize(0x5001, 1);

        let concrete: i64 = 0xaabb_ccdd;
        let read = memory.read(0x5000, ValueType::UInt, concrete).expect("still symbolic");
        assert_eq!(read.size(), 4);

        let assignment: BTreeMap<u32, i64> = [(0, 0x1122_3344)].into_iter().collect();
        assert_eq!(read.evaluate(&assignment), 0x1122_cc44);
    }

    #[test]
    fn test_narrow_read_extracts_from_wider_value() {
        let mut memory = SymbolicMemory::new();
        memory.write(0x6000, SymbolicExpr::new_symbol(ValueType::ULong, 0, 4));
        let byte = memory.read(0x6005, ValueType::UChar, 0).expect("covered by the wide value");
        match &byte {
            SymbolicExpr::Binary { op, right, size, .. } => {
                assert_eq!(*op, BinaryOp::Extract);
                assert_eq!(right.value(), 5);
                assert_eq!(*size, 1);
            }
            other => panic!("expected an extract, got {}", other),
        }
        let assignment: BTreeMap<u32, i64> = [(4, 0x0102_0304_0506_0708)].into_iter().collect();
        assert_eq!(byte.evaluate(&assignment), 0x03);
    }

    #[test]
    fn test_mixed_read_concatenates_concrete_bytes() {
        let mut memory = SymbolicMemory::new();
        memory.write(0x7002, SymbolicExpr::new_symbol(ValueType::UShort, 0, 1));
        let read = memory.read(0x7000, ValueType::UInt, 0x4444_5555).expect("upper half symbolic");
        let assignment: BTreeMap<u32, i64> = [(1, 0xbeef)].into_iter().collect();
        assert_eq!(read.evaluate(&assignment), 0xbeef_5555);
    }

    #[test]
    fn test_struct_reads_are_concrete() {
        let mut memory = SymbolicMemory::new();
        memory.write(0x8000, symbol(8, 0));
        assert_eq!(memory.read(0x8000, ValueType::Struct, 8), None);
    }

    #[test]
    #[should_panic]
    fn test_unaligned_write_fails_fast() {
        let mut memory = SymbolicMemory::new();
        memory.write(0x9001, symbol(4, 0));
    }
}
