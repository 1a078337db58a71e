pub mod concrete_memory;
pub mod object_tracker;
pub mod symbolic_memory;
pub mod symbolic_object;

pub use concrete_memory::{ConcreteMemory, MemoryImage, ProcessMemory};
pub use object_tracker::ObjectTracker;
pub use symbolic_memory::SymbolicMemory;
pub use symbolic_object::SymbolicObject;
