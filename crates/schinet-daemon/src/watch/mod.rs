//! Watch-log relay.
//!
//! Streams a live, filtered view of chat traffic for one source (optionally
//! one channel) to a separate viewer process over a loopback TCP connection.
//!
//! Architecture:
//! - `WatchRegistry`: session table, port allocation, per-session queues
//! - `WatchService`: create/kill/shutdown orchestration
//! - `RendezvousListener`: one-shot accept of the dialing-back viewer
//! - `run_relay_loop`: single consumer draining a session queue to the socket
//! - `filter::dispatch`: fans inbound messages out to matching sessions
//! - `prime_backlog`: replays archived messages ahead of live traffic

pub mod backlog;
pub mod filter;
pub mod launcher;
pub mod ports;
pub mod registry;
pub mod relay_loop;
pub mod rendezvous;
pub mod service;
pub mod types;

pub use backlog::prime_backlog;
pub use launcher::{ProcessSpawner, SpawnedViewer, SystemSpawner, ViewerTarget};
pub use registry::{PortRange, Reservation, WatchRegistry};
pub use relay_loop::{RelayContext, RelayExit, run_relay_loop};
pub use rendezvous::{AttachedViewer, RendezvousListener};
pub use service::{CreatedWatch, KillTicket, WatchService};
pub use types::{
    ChannelScope, RelayFrame, SessionId, SessionSnapshot, SessionState, SourceRef, WatchError,
    WatchRequest,
};
