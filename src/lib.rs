//! Tessera: a composable server-side response pipeline.
//!
//! Two tightly coupled engines make up the crate:
//!
//! - a multi-scope, TTL-based in-memory cache store with three
//!   specializations (static files, rendered routes, controller
//!   fragments), and
//! - a controller chain executor that composes a primary controller, an
//!   optional layout hand-off, and parallel includes into one response,
//!   short-circuiting through the caches wherever possible.
//!
//! The HTTP listener, body parsing, templating engine, and compression
//! codecs are the host's concern; they plug in through the traits in
//! [`chain`] and [`compress`].

pub mod cache;
pub mod chain;
pub mod compress;
pub mod config;
pub mod error;
pub mod telemetry;
pub mod value;

pub use cache::{CacheStore, Lifespan};
pub use chain::{ChainExecutor, ChainResponse, ControllerRegistry, Route};
pub use config::FrameworkConfig;
pub use error::{CacheError, ChainError};
