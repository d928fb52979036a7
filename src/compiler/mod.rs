pub mod core;
pub mod loader;
pub mod validator;

pub use self::core::Compiler;
pub use loader::{load_workflow, parse_workflow};
pub use validator::{UnresolvedNode, UnresolvedPolicy, ValidatedGraph, validate};
