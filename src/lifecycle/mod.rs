//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → RoutingState + FunctionRegistry → Dispatcher
//!     → rule and functions watchers
//!
//! Shutdown (shutdown.rs):
//!     Signal received → server stops accepting → watchers exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Reload rule files
//! ```
//!
//! # Design Decisions
//! - Rules load before the listener binds, so the first request sees them
//! - A watcher that fails to start is not fatal

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::Services;
