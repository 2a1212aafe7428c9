//! Database models for the SchiNET daemon.

use serde::{Deserialize, Serialize};

/// A monitored source (guild / group).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Source {
    pub id: String,
    pub name: String,
}

/// A channel inside a monitored source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Channel {
    pub id: String,
    pub source_id: String,
    pub name: String,
}

/// Archived chat message.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageRecord {
    pub id: i64,
    pub source_id: String,
    pub channel_id: String,
    pub channel_name: String,
    pub author_name: String,
    pub author_discriminator: String,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}
