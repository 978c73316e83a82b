//! Routing and dispatch core of a local development proxy.
//!
//! Requests are matched against redirect rules, serverless functions, edge
//! functions and add-on prefixes, then forwarded to the framework dev
//! server, the functions server, an external origin or the publish
//! directory.

pub mod activity;
pub mod assets;
pub mod config;
pub mod functions;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod rules;

pub use config::schema::DevConfig;
pub use http::HttpServer;
pub use lifecycle::{Services, Shutdown};
pub use routing::Dispatcher;
