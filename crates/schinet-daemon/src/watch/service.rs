//! Watch service: creates, kills, and shuts down watch sessions.
//!
//! Creation runs reserve -> bind -> spawn -> rendezvous -> attach, then hands
//! the socket to a relay task and the backlog to a task of its own. Any
//! failure before the relay starts releases the reservation.

use std::collections::HashSet;
use std::sync::Arc;

use schinet_core::PlatformMessage;
use schinet_core::config::WatchConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::backlog::prime_backlog;
use super::filter;
use super::launcher::{ProcessSpawner, ViewerTarget};
use super::registry::{PortRange, Reservation, WatchRegistry};
use super::relay_loop::{RelayContext, greeting, run_relay_loop};
use super::rendezvous::RendezvousListener;
use super::types::{RelayFrame, SessionSnapshot, SessionState, WatchError, WatchRequest};
use crate::storage::Database;

/// A session that reached the live state.
#[derive(Debug)]
pub struct CreatedWatch {
    pub session: SessionSnapshot,
    /// Backlog replay; resolves to the number of lines enqueued.
    pub backlog: JoinHandle<Result<usize, WatchError>>,
}

/// Handle on a session being torn down.
#[derive(Debug, Clone)]
pub struct KillTicket {
    pub session: SessionSnapshot,
    done: CancellationToken,
}

impl KillTicket {
    /// Resolves once the session has left the registry.
    pub async fn closed(&self) {
        self.done.cancelled().await;
    }
}

pub struct WatchService {
    registry: WatchRegistry,
    db: Database,
    spawner: Arc<dyn ProcessSpawner>,
    settings: WatchConfig,
    root: CancellationToken,
    tasks: TaskTracker,
}

impl WatchService {
    pub fn new(db: Database, spawner: Arc<dyn ProcessSpawner>, settings: WatchConfig) -> Self {
        Self {
            registry: WatchRegistry::new(),
            db,
            spawner,
            settings,
            root: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub const fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    pub const fn db(&self) -> &Database {
        &self.db
    }

    pub const fn settings(&self) -> &WatchConfig {
        &self.settings
    }

    /// Start watching a source. Returns once the viewer is attached.
    pub async fn create(&self, request: WatchRequest) -> Result<CreatedWatch, WatchError> {
        let (reservation, listener) = self.reserve_and_bind(&request).await?;
        let id = reservation.id;
        let done = reservation.done.clone();

        match self.establish(reservation, listener, request.backlog).await {
            Ok(created) => Ok(created),
            Err(e) => {
                self.registry.remove(id).await;
                done.cancel();
                warn!(session_id = %id, error = %e, "Watch session failed to start");
                Err(e)
            }
        }
    }

    /// Reserve a port and bind its listener, moving past ports that another
    /// process already holds.
    async fn reserve_and_bind(
        &self,
        request: &WatchRequest,
    ) -> Result<(Reservation, RendezvousListener), WatchError> {
        let ports = PortRange {
            base: self.settings.port_base,
            span: self.settings.port_span,
        };
        let mut taken = HashSet::new();

        loop {
            let reservation = self
                .registry
                .reserve(
                    request.source.clone(),
                    request.scope.clone(),
                    ports,
                    &taken,
                    &self.root,
                )
                .await?;

            match RendezvousListener::bind(&self.settings.host, reservation.port).await {
                Ok(listener) => return Ok((reservation, listener)),
                Err(e) => {
                    self.registry.remove(reservation.id).await;
                    reservation.done.cancel();
                    match e {
                        WatchError::PortInUse { port } => {
                            debug!(port, "Rendezvous port taken, trying the next one");
                            taken.insert(port);
                        }
                        e => {
                            warn!(
                                session_id = %reservation.id,
                                error = %e,
                                "Watch session failed to start"
                            );
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    async fn establish(
        &self,
        reservation: Reservation,
        listener: RendezvousListener,
        backlog: i64,
    ) -> Result<CreatedWatch, WatchError> {
        let Reservation {
            id,
            port,
            queue_tx,
            queue_rx,
            cancel,
            done,
        } = reservation;

        let viewer = self.spawner.spawn_viewer(&ViewerTarget {
            host: self.settings.host.clone(),
            port,
        })?;
        debug!(session_id = %id, port, launcher_pid = ?viewer.os_pid(), "Waiting for viewer");

        let attached = match listener
            .accept_viewer(id, self.settings.handshake_timeout(), &cancel)
            .await
        {
            Ok(attached) => attached,
            Err(e) => {
                viewer.kill().await;
                return Err(e);
            }
        };

        let session = self
            .registry
            .attach(id, attached.viewer_pid.clone())
            .await?;

        let ctx = RelayContext {
            session_id: id,
            viewer_pid: attached.viewer_pid,
            greeting: greeting(&session),
            write_timeout: self.settings.write_timeout(),
            write_delay: self.settings.write_delay(),
            cancel,
            done,
            registry: self.registry.clone(),
        };
        let grace = self.settings.shutdown_grace();
        self.tasks.spawn(async move {
            run_relay_loop(ctx, attached.stream, queue_rx).await;
            viewer.reap(grace).await;
        });

        let db = self.db.clone();
        let snapshot = session.clone();
        let backlog = self
            .tasks
            .spawn(async move { prime_backlog(&db, &snapshot, backlog, &queue_tx).await });

        info!(session_id = %id, port, label = %session.label(), "Watch session live");
        Ok(CreatedWatch { session, backlog })
    }

    /// Stop the session at `index` of [`list`](Self::list).
    pub async fn kill(&self, index: usize) -> Result<KillTicket, WatchError> {
        let session = self.registry.by_index(index).await?;
        let id = session.id;
        let done = self
            .registry
            .done_token(id)
            .await
            .ok_or(WatchError::SessionNotFound { id })?;

        self.stop(&session).await;
        Ok(KillTicket { session, done })
    }

    async fn stop(&self, session: &SessionSnapshot) {
        let id = session.id;
        match session.state {
            SessionState::Pending => {
                if let Some(cancel) = self.registry.cancel_token(id).await {
                    cancel.cancel();
                }
            }
            SessionState::Live => {
                if self.registry.send(id, RelayFrame::Shutdown).await.is_err() {
                    debug!(session_id = %id, "Session already closing");
                }
            }
        }
        info!(session_id = %id, label = %session.label(), "Stopping watch session");
    }

    pub async fn list(&self) -> Vec<SessionSnapshot> {
        self.registry.list().await
    }

    /// Fan a platform message out to matching live sessions.
    pub async fn dispatch(&self, msg: &PlatformMessage) -> usize {
        filter::dispatch(&self.registry, msg).await
    }

    /// Stop every session, waiting up to the shutdown grace for viewers to
    /// receive their shutdown line before cancelling what is left.
    pub async fn shutdown(&self) {
        let sessions = self.registry.list().await;
        let mut pending = Vec::with_capacity(sessions.len());
        for session in &sessions {
            if let Some(done) = self.registry.done_token(session.id).await {
                pending.push(done);
            }
            self.stop(session).await;
        }

        let grace = self.settings.shutdown_grace();
        let drained = async {
            for done in &pending {
                done.cancelled().await;
            }
        };
        if tokio::time::timeout(grace, drained).await.is_err() {
            warn!(
                remaining = self.registry.len().await,
                "Watch sessions did not close in time, cancelling"
            );
        }

        self.root.cancel();
        self.tasks.close();
        if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
            warn!("Relay tasks still running at exit");
        }
        info!(stopped = sessions.len(), "Watch service shut down");
    }
}
