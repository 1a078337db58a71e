pub mod concolic;
pub mod logging;
pub mod runtime;
pub mod state;
pub mod target_info;
