//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request id, server header)
//!     → [routing::Dispatcher picks the upstream]
//!     → forward.rs (framework, functions, external, static files)
//!     → response.rs (header rules, ETag, HTML injection)
//!     → encoding.rs (decode/re-encode bodies that get rewritten)
//!     → Send to client
//! ```

pub mod encoding;
pub mod forward;
pub mod response;
pub mod server;

pub use server::HttpServer;
