pub mod executor;
pub mod executor_bool;
pub mod executor_int;
pub mod expr_codec;
pub mod ops;
pub mod symbolic_expr;
pub mod trace;
pub mod z3_integration;

pub use executor::{ConcolicExecutor, StackElem};
pub use expr_codec::TraceError;
pub use symbolic_expr::SymbolicExpr;
pub use trace::{ExecutionTrace, PathEntry};
pub use z3_integration::Z3Integration;
