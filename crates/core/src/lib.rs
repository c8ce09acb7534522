// crates/core/src/lib.rs
pub mod env;
pub mod error;
pub mod event;
pub mod parser;
pub mod paths;
pub mod types;

pub use error::*;
pub use event::*;
pub use parser::*;
pub use types::*;
