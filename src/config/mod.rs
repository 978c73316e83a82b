//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! dev config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → DevConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On rule file change:
//!     watcher.rs detects change
//!     → rules are re-read from disk
//!     → atomic swap of the compiled rule set
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only derived rule data is reloaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{DevConfig, FrameworkConfig, HtmlInjection, InjectionLocation, ListenerConfig};
