pub mod config;
pub mod errors;
#[macro_use]
pub mod logging;
pub mod setup;
pub mod spec;

// Re-export color printing macros
pub use crate::print_blue;
pub use crate::print_green;
pub use crate::print_red;
pub use crate::print_yellow;

pub use config::EngineConfig;
pub use errors::{ErrorKind, ProbError};
