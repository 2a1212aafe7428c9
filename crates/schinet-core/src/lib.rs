//! SchiNET Core Library
//!
//! Shared functionality for SchiNET components:
//! - Platform message events and their NDJSON wire form
//! - Configuration resolution and hierarchy
//! - SQLite pool helpers
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod platform;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use platform::PlatformMessage;
