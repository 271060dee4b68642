//! hput Server
//!
//! This crate turns stored runnables into HTTP responses. It provides the
//! content classifier, the Boa-based script sandbox, the export writer, the
//! request coordinator and the hyper front end.

pub mod classifier;
pub mod config;
pub mod export;
pub mod http_server;
pub mod resource_limits;
pub mod runtime;
pub mod service;

pub use classifier::{Classification, classify};
pub use config::ServerConfig;
pub use export::{ExportStream, ReplayWriter};
pub use http_server::HttpServer;
pub use resource_limits::ResourceLimits;
pub use runtime::{RequestView, ResponseSink, Sandbox};
pub use service::{PutOutcome, RunOutcome, Service};
