//! Watch relay types.

use std::fmt;

use crate::storage::DatabaseError;

/// Generated identifier of a watch session. Monotonically increasing, so
/// ordering by id is creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// The monitored source a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub id: String,
    pub name: String,
}

/// Which channels of the source are relayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelScope {
    All,
    Channel { id: String, name: String },
}

impl ChannelScope {
    pub const fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    pub fn channel_id(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Channel { id, .. } => Some(id),
        }
    }

    pub fn channel_name(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Channel { name, .. } => Some(name),
        }
    }
}

/// One item on a session's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    /// A formatted line for the viewer.
    Line(String),
    /// Tell the viewer to exit and tear the session down.
    Shutdown,
}

/// Lifecycle state of a registered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Port reserved, waiting for the viewer to connect back.
    Pending,
    /// Viewer attached; relay loop running.
    Live,
}

/// Point-in-time view of a registered session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub source: SourceRef,
    pub scope: ChannelScope,
    pub port: u16,
    pub viewer_pid: Option<String>,
    pub state: SessionState,
}

impl SessionSnapshot {
    /// Human-readable label: `source` or `source -> channel`.
    pub fn label(&self) -> String {
        match self.scope.channel_name() {
            Some(channel) => format!("{} -> {}", self.source.name, channel),
            None => self.source.name.clone(),
        }
    }
}

/// Operator's request to start watching a source.
#[derive(Debug, Clone)]
pub struct WatchRequest {
    pub source: SourceRef,
    pub scope: ChannelScope,
    /// Number of archived messages to replay; zero or less skips the backlog.
    pub backlog: i64,
}

/// Errors from watch relay operations.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("No free watch port in {base}..{end}")]
    PortsExhausted { base: u16, end: u32 },

    #[error("Failed to spawn viewer: {reason}")]
    SpawnFailed { reason: String },

    #[error("Failed to bind rendezvous listener on {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("Rendezvous port {port} is held by another process")]
    PortInUse { port: u16 },

    #[error("Rendezvous failed on port {port}: {reason}")]
    RendezvousFailed { port: u16, reason: String },

    #[error("Viewer did not connect to port {port} within {secs}s")]
    HandshakeTimeout { port: u16, secs: u64 },

    #[error("Watch session {id} was cancelled")]
    Cancelled { id: SessionId },

    #[error("Watch session not found: {id}")]
    SessionNotFound { id: SessionId },

    #[error("Viewer already attached to session {id}")]
    AlreadyAttached { id: SessionId },

    #[error("No watcher at index {index} ({len} active)")]
    InvalidIndex { index: usize, len: usize },

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}
