//! Serverless functions subsystem.
//!
//! # Data Flow
//! ```text
//! functions dir → registry.rs (scan) → RegisteredFunction (build gate)
//!                                         ↑
//!                          builder.rs (FunctionBuilder) produces routes
//!
//! Request path + method → FunctionRegistry::locate → FunctionMatch
//! ```

pub mod builder;
pub mod function;
pub mod registry;
pub mod watcher;

pub use builder::{BuildError, ConfiguredRoutesBuilder, FunctionBuilder, FunctionSource};
pub use function::{RegisteredFunction, Runtime};
pub use registry::{FunctionMatch, FunctionRegistry};
pub use watcher::watch_functions;
