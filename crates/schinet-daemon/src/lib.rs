//! SchiNET Daemon Library
//!
//! Core functionality for the SchiNET daemon:
//! - Watch-log relay: live, filtered chat views streamed to viewer processes
//! - Ingest endpoint for platform messages from a chat gateway
//! - SQLite archive of sources, channels, and messages
//! - Interactive operator console
//! - Viewer mode, the other end of a watch session

pub mod console;
pub mod ingest;
pub mod storage;
pub mod viewer;
pub mod watch;
