//! Dispatch core.
//!
//! # Data Flow
//! ```text
//! Incoming request
//!     → dispatcher.rs (buffer body, build RequestContext)
//!     → images / edge.rs / functions locate / addons.rs
//!     → state.rs snapshot → rule match → serve_rule
//!         (signing.rs, JWT gate, redirects, rewrites)
//!     → upstream (framework, static, functions, external)
//!     → 404/403 → alternative paths → rule fallback
//!     → response post-processing
//!
//! Upgrade requests
//!     → upgrade.rs (rule match only) → tunnel
//! ```
//!
//! # Design Decisions
//! - Rule state is swapped whole on reload; requests keep their snapshot
//! - Per-request state lives in `RequestContext`, never on shared objects

pub mod addons;
pub mod context;
pub mod dispatcher;
pub mod edge;
pub mod signing;
pub mod state;
pub mod upgrade;

pub use context::RequestContext;
pub use dispatcher::{DispatchError, Dispatcher};
pub use edge::{ConfiguredEdgeRouter, EdgeFunctionRouter, EdgeRoute};
pub use state::RoutingState;
