//! `SQLite` storage for the SchiNET daemon.
//!
//! Archives inbound chat messages and the sources/channels they came from.
//! The watch relay reads its backlog from here.

mod db;
mod models;
mod queries;

pub use db::{Database, DatabaseError};
pub use models::*;
