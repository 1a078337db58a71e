use crest::concolic::ops::ValueType;
use crest::concolic::SymbolicExpr;
use crest::state::{MemoryImage, ObjectTracker, SymbolicObject};

#[cfg(test)]
mod tests {
    use super::*;

    fn symbolic_addr(var: u32) -> SymbolicExpr {
        SymbolicExpr::new_symbol(ValueType::ULong, 0x1000, var)
    }

    #[test]
    fn test_find_uses_half_open_intervals() {
        let mut tracker = ObjectTracker::new();
        tracker.add(0x1000, 0x10);
        tracker.add(0x1010, 0x20);
        tracker.add(0x2000, 4);

        assert_eq!(tracker.find(0x1000).map(|o| o.start()), Some(0x1000));
        assert_eq!(tracker.find(0x100f).map(|o| o.start()), Some(0x1000));
        assert_eq!(tracker.find(0x1010).map(|o| o.start()), Some(0x1010));
        assert_eq!(tracker.find(0x102f).map(|o| o.start()), Some(0x1010));
        assert!(tracker.find(0x1030).is_none());
        assert!(tracker.find(0x0fff).is_none());
        assert!(tracker.find(0x2004).is_none());
    }

    #[test]
    fn test_remove_requires_exact_start() {
        let mut tracker = ObjectTracker::new();
        tracker.add(0x1000, 0x10);
        tracker.remove(0x1004);
        assert_eq!(tracker.len(), 1);
        tracker.remove(0x1000);
        assert!(tracker.is_empty());
        assert!(tracker.find(0x1004).is_none());
        // Unknown addresses are ignored.
        tracker.remove(0x1000);
    }

    #[test]
    fn test_zero_sized_objects_are_not_tracked() {
        let mut tracker = ObjectTracker::new();
        tracker.add(0x1000, 0);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_concrete_accesses_stay_in_flat_mode() {
        let mut object = SymbolicObject::new(0x1000, 16);
        let value = SymbolicExpr::new_symbol(ValueType::Int, 3, 0);
        object.write(None, 0x1004, value.clone());
        assert!(!object.in_deref_mode());

        let image = MemoryImage::new();
        assert_eq!(object.read(0x1004, ValueType::Int, 3, &image), Some(value));

        object.concretize(None, 0x1004, ValueType::Int, 3);
        assert_eq!(object.read(0x1004, ValueType::Int, 3, &image), None);
        assert!(object.memory().is_empty());
    }

    #[test]
    fn test_symbolic_write_switches_to_deref_mode() {
        let mut object = SymbolicObject::new(0x1000, 16);
        object.write(Some(symbolic_addr(1)), 0x1000, SymbolicExpr::new_concrete(ValueType::Int, 9));
        assert!(object.in_deref_mode());
        assert_eq!(object.writes().len(), 1);

        // Later concrete-address accesses are logged too.
        object.concretize(None, 0x1008, ValueType::Int, 5);
        assert_eq!(object.writes().len(), 2);
        assert_eq!(object.writes()[1].0, SymbolicExpr::new_concrete(ValueType::ULong, 0x1008));
        assert_eq!(object.writes()[1].1, SymbolicExpr::new_concrete(ValueType::Int, 5));

        let mut image = MemoryImage::new();
        image.write_value(0x1000, 4, 9);
        let read = object.read(0x1004, ValueType::Int, 0, &image).expect("deref mode reads are symbolic");
        match read {
            SymbolicExpr::Deref { addr, object: snapshot, concrete_bytes, size, .. } => {
                assert_eq!(*addr, SymbolicExpr::new_concrete(ValueType::ULong, 0x1004));
                assert_eq!(snapshot.writes().len(), 2);
                assert_eq!(concrete_bytes.len(), 16);
                assert_eq!(concrete_bytes[0], 9);
                assert_eq!(size, 4);
            }
            other => panic!("expected a deref node, got {}", other),
        }
    }

    #[test]
    fn test_deref_snapshot_is_independent_of_later_writes() {
        let mut object = SymbolicObject::new(0x1000, 8);
        object.write(Some(symbolic_addr(1)), 0x1000, SymbolicExpr::new_concrete(ValueType::Int, 1));
        let image = MemoryImage::new();
        let read = object.read(0x1000, ValueType::Int, 1, &image).expect("symbolic");
        object.write(Some(symbolic_addr(2)), 0x1004, SymbolicExpr::new_concrete(ValueType::Int, 2));
        match read {
            SymbolicExpr::Deref { object: snapshot, .. } => assert_eq!(snapshot.writes().len(), 1),
            other => panic!("expected a deref node, got {}", other),
        }
        assert_eq!(object.writes().len(), 2);
    }

    #[test]
    fn test_struct_store_in_deref_mode_wipes_range() {
        let mut object = SymbolicObject::new(0x1000, 16);
        object.write(None, 0x1008, SymbolicExpr::new_symbol(ValueType::Long, 0, 0));
        object.write(Some(symbolic_addr(1)), 0x1000, SymbolicExpr::new_concrete(ValueType::Int, 1));
        object.concretize(None, 0x1000, ValueType::Struct, 16);
        assert!(object.memory().is_empty());
        assert_eq!(object.writes().len(), 1);
    }

    #[test]
    fn test_vars_include_memory_and_writes() {
        let mut object = SymbolicObject::new(0x1000, 16);
        object.write(None, 0x1000, SymbolicExpr::new_symbol(ValueType::Int, 0, 4));
        object.write(Some(symbolic_addr(7)), 0x1004, SymbolicExpr::new_symbol(ValueType::Int, 0, 8));
        let mut vars = std::collections::BTreeSet::new();
        object.append_vars(&mut vars);
        assert_eq!(vars.into_iter().collect::<Vec<_>>(), vec![4, 7, 8]);
    }
}
