//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and histograms per dispatch target)
//!
//! Consumers:
//!     → stdout, human or JSON lines
//!     → Prometheus scrape endpoint, when enabled
//! ```
//!
//! # Design Decisions
//! - Request ID (`x-nf-request-id`) appears on every dispatch log line
//! - Metrics are cheap; nothing is recorded without an installed exporter

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
