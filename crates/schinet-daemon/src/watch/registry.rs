//! Watch registry: the table of active watch sessions.
//!
//! Sessions are created, looked up, and removed only here. The console path
//! (watch/kill) and each relay loop's self-removal run concurrently, so every
//! mutation goes through one lock.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::ports::allocate_port;
use super::types::{
    ChannelScope, RelayFrame, SessionId, SessionSnapshot, SessionState, SourceRef, WatchError,
};

/// Port window handed to the allocator.
#[derive(Debug, Clone, Copy)]
pub struct PortRange {
    pub base: u16,
    pub span: u16,
}

/// Result of reserving a session: its identity plus the consumer side of its
/// outbound queue.
#[derive(Debug)]
pub struct Reservation {
    pub id: SessionId,
    pub port: u16,
    pub queue_tx: mpsc::UnboundedSender<RelayFrame>,
    pub queue_rx: mpsc::UnboundedReceiver<RelayFrame>,
    /// Aborts a hung rendezvous or relay.
    pub cancel: CancellationToken,
    /// Cancelled once the session has fully torn down.
    pub done: CancellationToken,
}

/// Producer side of a live session, used by the event filter.
#[derive(Debug, Clone)]
pub(crate) struct Route {
    pub id: SessionId,
    pub source_id: String,
    pub scope: ChannelScope,
    pub queue: mpsc::UnboundedSender<RelayFrame>,
}

struct Entry {
    source: SourceRef,
    scope: ChannelScope,
    port: u16,
    viewer_pid: Option<String>,
    state: SessionState,
    queue: mpsc::UnboundedSender<RelayFrame>,
    cancel: CancellationToken,
    done: CancellationToken,
}

impl Entry {
    fn snapshot(&self, id: SessionId) -> SessionSnapshot {
        SessionSnapshot {
            id,
            source: self.source.clone(),
            scope: self.scope.clone(),
            port: self.port,
            viewer_pid: self.viewer_pid.clone(),
            state: self.state,
        }
    }
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    sessions: BTreeMap<SessionId, Entry>,
}

/// Shared, cloneable handle to the session table.
#[derive(Clone, Default)]
pub struct WatchRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a port and register a pending session in one step.
    ///
    /// Ports in `unavailable` are skipped along with those held by sessions.
    pub async fn reserve(
        &self,
        source: SourceRef,
        scope: ChannelScope,
        ports: PortRange,
        unavailable: &HashSet<u16>,
        parent: &CancellationToken,
    ) -> Result<Reservation, WatchError> {
        let mut inner = self.inner.write().await;

        let in_use: HashSet<u16> = inner
            .sessions
            .values()
            .map(|e| e.port)
            .chain(unavailable.iter().copied())
            .collect();
        let port = allocate_port(ports.base, ports.span, &in_use)?;

        inner.next_id += 1;
        let id = SessionId(inner.next_id);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let cancel = parent.child_token();
        let done = CancellationToken::new();

        info!(session_id = %id, source_id = %source.id, port, "Reserved watch session");

        inner.sessions.insert(
            id,
            Entry {
                source,
                scope,
                port,
                viewer_pid: None,
                state: SessionState::Pending,
                queue: queue_tx.clone(),
                cancel: cancel.clone(),
                done: done.clone(),
            },
        );
        drop(inner);

        Ok(Reservation {
            id,
            port,
            queue_tx,
            queue_rx,
            cancel,
            done,
        })
    }

    /// Record the viewer's process id and mark the session live.
    ///
    /// The pid can be set exactly once.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn attach(
        &self,
        id: SessionId,
        viewer_pid: String,
    ) -> Result<SessionSnapshot, WatchError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .sessions
            .get_mut(&id)
            .ok_or(WatchError::SessionNotFound { id })?;

        if entry.viewer_pid.is_some() {
            return Err(WatchError::AlreadyAttached { id });
        }
        entry.viewer_pid = Some(viewer_pid);
        entry.state = SessionState::Live;

        Ok(entry.snapshot(id))
    }

    /// Remove a session, releasing its port. Dropping the entry drops the
    /// registry's queue sender.
    pub async fn remove(&self, id: SessionId) -> Option<SessionSnapshot> {
        let removed = self.inner.write().await.sessions.remove(&id);
        removed.map(|entry| {
            debug!(session_id = %id, port = entry.port, "Removed watch session");
            entry.snapshot(id)
        })
    }

    /// All sessions in creation order.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .iter()
            .map(|(id, entry)| entry.snapshot(*id))
            .collect()
    }

    /// Sessions watching the given source.
    pub async fn lookup(&self, source_id: &str) -> Vec<SessionSnapshot> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .iter()
            .filter(|(_, entry)| entry.source.id == source_id)
            .map(|(id, entry)| entry.snapshot(*id))
            .collect()
    }

    pub async fn get(&self, id: SessionId) -> Option<SessionSnapshot> {
        let inner = self.inner.read().await;
        inner.sessions.get(&id).map(|entry| entry.snapshot(id))
    }

    /// The session at position `index` of [`list`](Self::list).
    pub async fn by_index(&self, index: usize) -> Result<SessionSnapshot, WatchError> {
        let inner = self.inner.read().await;
        let len = inner.sessions.len();
        inner
            .sessions
            .iter()
            .nth(index)
            .map(|(id, entry)| entry.snapshot(*id))
            .ok_or(WatchError::InvalidIndex { index, len })
    }

    /// Enqueue a frame on a session's outbound queue.
    pub async fn send(&self, id: SessionId, frame: RelayFrame) -> Result<(), WatchError> {
        let inner = self.inner.read().await;
        let entry = inner
            .sessions
            .get(&id)
            .ok_or(WatchError::SessionNotFound { id })?;
        entry
            .queue
            .send(frame)
            .map_err(|_| WatchError::SessionNotFound { id })
    }

    /// Cancellation token of a session (aborts rendezvous and relay).
    pub async fn cancel_token(&self, id: SessionId) -> Option<CancellationToken> {
        let inner = self.inner.read().await;
        inner.sessions.get(&id).map(|entry| entry.cancel.clone())
    }

    /// Token cancelled when the session has fully torn down.
    pub async fn done_token(&self, id: SessionId) -> Option<CancellationToken> {
        let inner = self.inner.read().await;
        inner.sessions.get(&id).map(|entry| entry.done.clone())
    }

    /// Producer handles of all live sessions.
    pub(crate) async fn live_routes(&self) -> Vec<Route> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .iter()
            .filter(|(_, entry)| entry.state == SessionState::Live)
            .map(|(id, entry)| Route {
                id: *id,
                source_id: entry.source.id.clone(),
                scope: entry.scope.clone(),
                queue: entry.queue.clone(),
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.sessions.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const PORTS: PortRange = PortRange {
        base: 8444,
        span: 64,
    };

    fn source(id: &str) -> SourceRef {
        SourceRef {
            id: id.to_string(),
            name: format!("{id}-name"),
        }
    }

    #[tokio::test]
    async fn reserve_assigns_unique_ports() {
        let registry = WatchRegistry::new();
        let root = CancellationToken::new();

        let a = registry
            .reserve(source("g1"), ChannelScope::All, PORTS, &HashSet::new(), &root)
            .await
            .unwrap();
        let b = registry
            .reserve(source("g1"), ChannelScope::All, PORTS, &HashSet::new(), &root)
            .await
            .unwrap();

        assert_ne!(a.port, b.port);
        assert!(a.id < b.id);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn concurrent_reservations_never_share_a_port() {
        let registry = WatchRegistry::new();
        let root = CancellationToken::new();

        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            let root = root.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .reserve(
                        source(&format!("g{i}")),
                        ChannelScope::All,
                        PORTS,
                        &HashSet::new(),
                        &root,
                    )
                    .await
                    .unwrap()
                    .port
            }));
        }

        let mut ports = HashSet::new();
        for handle in handles {
            assert!(ports.insert(handle.await.unwrap()));
        }
    }

    #[tokio::test]
    async fn removed_port_is_reused() {
        let registry = WatchRegistry::new();
        let root = CancellationToken::new();

        let a = registry
            .reserve(source("g1"), ChannelScope::All, PORTS, &HashSet::new(), &root)
            .await
            .unwrap();
        registry.remove(a.id).await.unwrap();

        let b = registry
            .reserve(source("g2"), ChannelScope::All, PORTS, &HashSet::new(), &root)
            .await
            .unwrap();
        assert_eq!(a.port, b.port);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn unavailable_ports_are_skipped() {
        let registry = WatchRegistry::new();
        let root = CancellationToken::new();
        let unavailable: HashSet<u16> = [8444, 8445].into_iter().collect();

        let r = registry
            .reserve(source("g1"), ChannelScope::All, PORTS, &unavailable, &root)
            .await
            .unwrap();
        assert_eq!(r.port, 8446);

        let narrow = PortRange {
            base: 8444,
            span: 2,
        };
        let err = registry
            .reserve(source("g2"), ChannelScope::All, narrow, &unavailable, &root)
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::PortsExhausted { .. }));
    }

    #[tokio::test]
    async fn attach_sets_pid_exactly_once() {
        let registry = WatchRegistry::new();
        let root = CancellationToken::new();
        let r = registry
            .reserve(source("g1"), ChannelScope::All, PORTS, &HashSet::new(), &root)
            .await
            .unwrap();

        let snap = registry.attach(r.id, "4242".into()).await.unwrap();
        assert_eq!(snap.viewer_pid.as_deref(), Some("4242"));
        assert_eq!(snap.state, SessionState::Live);

        let err = registry.attach(r.id, "9999".into()).await.unwrap_err();
        assert!(matches!(err, WatchError::AlreadyAttached { .. }));
        assert_eq!(
            registry.get(r.id).await.unwrap().viewer_pid.as_deref(),
            Some("4242")
        );
    }

    #[tokio::test]
    async fn removing_middle_session_keeps_others_intact() {
        let registry = WatchRegistry::new();
        let root = CancellationToken::new();

        let mut ids = Vec::new();
        for (i, pid) in ["100", "200", "300"].iter().enumerate() {
            let r = registry
                .reserve(source(&format!("g{i}")), ChannelScope::All, PORTS, &HashSet::new(), &root)
                .await
                .unwrap();
            registry.attach(r.id, (*pid).to_string()).await.unwrap();
            ids.push(r.id);
        }
        let before = registry.list().await;

        let victim = registry.by_index(1).await.unwrap();
        assert_eq!(victim.id, ids[1]);
        registry.remove(victim.id).await.unwrap();

        let after = registry.list().await;
        assert_eq!(after, vec![before[0].clone(), before[2].clone()]);
    }

    #[tokio::test]
    async fn by_index_out_of_range() {
        let registry = WatchRegistry::new();
        let err = registry.by_index(0).await.unwrap_err();
        assert!(matches!(err, WatchError::InvalidIndex { index: 0, len: 0 }));
    }

    #[tokio::test]
    async fn only_live_sessions_are_routed() {
        let registry = WatchRegistry::new();
        let root = CancellationToken::new();
        let pending = registry
            .reserve(source("g1"), ChannelScope::All, PORTS, &HashSet::new(), &root)
            .await
            .unwrap();
        let live = registry
            .reserve(source("g1"), ChannelScope::All, PORTS, &HashSet::new(), &root)
            .await
            .unwrap();
        registry.attach(live.id, "1".into()).await.unwrap();

        let routes = registry.live_routes().await;
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].id, live.id);
        assert_ne!(routes[0].id, pending.id);
    }

    #[tokio::test]
    async fn lookup_by_source() {
        let registry = WatchRegistry::new();
        let root = CancellationToken::new();
        registry
            .reserve(source("g1"), ChannelScope::All, PORTS, &HashSet::new(), &root)
            .await
            .unwrap();
        registry
            .reserve(source("g2"), ChannelScope::All, PORTS, &HashSet::new(), &root)
            .await
            .unwrap();

        let found = registry.lookup("g2").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source.id, "g2");
    }

    #[tokio::test]
    async fn session_token_is_child_of_parent() {
        let registry = WatchRegistry::new();
        let root = CancellationToken::new();
        let r = registry
            .reserve(source("g1"), ChannelScope::All, PORTS, &HashSet::new(), &root)
            .await
            .unwrap();

        root.cancel();
        assert!(r.cancel.is_cancelled());
        assert!(!r.done.is_cancelled());
    }
}
