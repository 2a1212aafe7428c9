//! Single-shot rendezvous listener.
//!
//! Accepts exactly one connection (the spawned viewer dialing back) and reads
//! the viewer's process id from its first line. The listener is dropped once
//! that connection is handled.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::types::{SessionId, WatchError};

/// Upper bound on the identity line; a pid never comes close.
const MAX_IDENTITY_LEN: u64 = 64;

/// A viewer that connected back and identified itself.
#[derive(Debug)]
pub struct AttachedViewer {
    pub stream: TcpStream,
    pub viewer_pid: String,
    pub peer: SocketAddr,
}

#[derive(Debug)]
pub struct RendezvousListener {
    listener: TcpListener,
    port: u16,
}

impl RendezvousListener {
    /// Bind `host:port`. Port `0` asks the OS for a free port.
    ///
    /// A port already taken by someone else is reported as
    /// [`WatchError::PortInUse`] so the caller can move on to the next one.
    pub async fn bind(host: &str, port: u16) -> Result<Self, WatchError> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == ErrorKind::AddrInUse {
                WatchError::PortInUse { port }
            } else {
                WatchError::BindFailed {
                    addr: addr.clone(),
                    reason: e.to_string(),
                }
            }
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| WatchError::BindFailed {
                addr,
                reason: e.to_string(),
            })?
            .port();
        Ok(Self { listener, port })
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the viewer, bounded by `timeout` and `cancel`.
    pub async fn accept_viewer(
        self,
        session_id: SessionId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<AttachedViewer, WatchError> {
        let port = self.port;
        tokio::select! {
            () = cancel.cancelled() => Err(WatchError::Cancelled { id: session_id }),
            res = tokio::time::timeout(timeout, self.accept_and_identify()) => match res {
                Ok(attached) => {
                    let attached = attached?;
                    info!(
                        session_id = %session_id,
                        port,
                        peer = %attached.peer,
                        viewer_pid = %attached.viewer_pid,
                        "Viewer attached"
                    );
                    Ok(attached)
                }
                Err(_) => Err(WatchError::HandshakeTimeout {
                    port,
                    secs: timeout.as_secs(),
                }),
            },
        }
    }

    async fn accept_and_identify(self) -> Result<AttachedViewer, WatchError> {
        let port = self.port;
        let failed = |reason: String| WatchError::RendezvousFailed { port, reason };

        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        let read = (&mut reader)
            .take(MAX_IDENTITY_LEN)
            .read_until(b'\n', &mut line)
            .await
            .map_err(|e| failed(e.to_string()))?;
        if read == 0 {
            return Err(failed("viewer closed before identifying".into()));
        }

        let viewer_pid = String::from_utf8_lossy(&line).trim().to_string();
        if viewer_pid.is_empty() || !viewer_pid.chars().all(|c| c.is_ascii_digit()) {
            // Kept as-is: the viewer still exits on EOF if it never sees its
            // own shutdown line.
            warn!(port, token = %viewer_pid, "Viewer sent a malformed process id");
        }

        Ok(AttachedViewer {
            stream: reader.into_inner(),
            viewer_pid,
            peer,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn reads_viewer_pid() {
        let listener = RendezvousListener::bind("127.0.0.1", 0).await.unwrap();
        let port = listener.port();
        let cancel = CancellationToken::new();

        let client = tokio::spawn(async move {
            let mut s = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            s.write_all(b"31337\n").await.unwrap();
            s
        });

        let attached = listener
            .accept_viewer(SessionId(1), Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        assert_eq!(attached.viewer_pid, "31337");
        drop(client.await.unwrap());
    }

    #[tokio::test]
    async fn malformed_pid_does_not_fail() {
        let listener = RendezvousListener::bind("127.0.0.1", 0).await.unwrap();
        let port = listener.port();
        let cancel = CancellationToken::new();

        tokio::spawn(async move {
            let mut s = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            s.write_all(b"  not-a-pid \r\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let attached = listener
            .accept_viewer(SessionId(1), Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        assert_eq!(attached.viewer_pid, "not-a-pid");
    }

    #[tokio::test]
    async fn non_utf8_pid_does_not_fail() {
        let listener = RendezvousListener::bind("127.0.0.1", 0).await.unwrap();
        let port = listener.port();
        let cancel = CancellationToken::new();

        tokio::spawn(async move {
            let mut s = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            s.write_all(b"12\xff34\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let attached = listener
            .accept_viewer(SessionId(1), Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        assert_eq!(attached.viewer_pid, "12\u{fffd}34");
    }

    #[tokio::test]
    async fn times_out_when_nobody_connects() {
        let listener = RendezvousListener::bind("127.0.0.1", 0).await.unwrap();
        let cancel = CancellationToken::new();

        let err = listener
            .accept_viewer(SessionId(1), Duration::from_millis(50), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::HandshakeTimeout { .. }));
    }

    #[tokio::test]
    async fn times_out_when_viewer_stays_silent() {
        let listener = RendezvousListener::bind("127.0.0.1", 0).await.unwrap();
        let port = listener.port();
        let cancel = CancellationToken::new();

        let _silent = tokio::spawn(async move {
            let s = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(s);
        });

        let err = listener
            .accept_viewer(SessionId(1), Duration::from_millis(100), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::HandshakeTimeout { .. }));
    }

    #[tokio::test]
    async fn cancellation_aborts_accept() {
        let listener = RendezvousListener::bind("127.0.0.1", 0).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = listener
            .accept_viewer(SessionId(7), Duration::from_secs(30), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::Cancelled { id: SessionId(7) }));
    }

    #[tokio::test]
    async fn eof_before_identity_is_a_rendezvous_failure() {
        let listener = RendezvousListener::bind("127.0.0.1", 0).await.unwrap();
        let port = listener.port();
        let cancel = CancellationToken::new();

        tokio::spawn(async move {
            drop(TcpStream::connect(("127.0.0.1", port)).await.unwrap());
        });

        let err = listener
            .accept_viewer(SessionId(1), Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::RendezvousFailed { .. }));
    }

    #[tokio::test]
    async fn bind_conflict_is_port_in_use() {
        let first = RendezvousListener::bind("127.0.0.1", 0).await.unwrap();
        let err = RendezvousListener::bind("127.0.0.1", first.port())
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::PortInUse { port } if port == first.port()));
    }

    #[tokio::test]
    async fn foreign_address_is_bind_failure() {
        let err = RendezvousListener::bind("203.0.113.1", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::BindFailed { .. }));
    }
}
