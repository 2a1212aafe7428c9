//! Platform message events.
//!
//! A chat gateway delivers one [`PlatformMessage`] per inbound message. On the
//! wire this is newline-delimited JSON, one object per line. The reader is
//! tolerant: unknown fields are ignored and missing optional fields default.

use serde::{Deserialize, Serialize};

use crate::db::unix_timestamp_millis;
use crate::error::{Error, Result};

/// Source id reserved for direct (private) messages.
pub const PRIVATE_SOURCE: &str = "private";

/// One inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformMessage {
    pub source_id: String,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub channel_name: String,
    pub author_name: String,
    #[serde(default)]
    pub author_discriminator: String,
    #[serde(default)]
    pub content: String,
    /// Milliseconds since the Unix epoch; filled in on receipt when absent.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl PlatformMessage {
    pub fn is_private(&self) -> bool {
        self.source_id == PRIVATE_SOURCE
    }

    /// Timestamp of the message, or now if the gateway did not supply one.
    pub fn timestamp_or_now(&self) -> i64 {
        self.timestamp.unwrap_or_else(unix_timestamp_millis)
    }
}

/// Parse a single NDJSON line into a platform message.
pub fn parse_line(line: &str) -> Result<PlatformMessage> {
    let msg: PlatformMessage = serde_json::from_str(line)?;
    if msg.source_id.is_empty() {
        return Err(Error::EventParse("empty 'source_id'".into()));
    }
    if msg.author_name.is_empty() {
        return Err(Error::EventParse("empty 'author_name'".into()));
    }
    Ok(msg)
}
