//! Ingest endpoint for platform messages.
//!
//! A chat gateway connects over TCP and writes one JSON-encoded
//! [`PlatformMessage`] per line. Each message is archived, then fanned out to
//! matching watch sessions. Malformed lines are logged and skipped; they never
//! close the connection.

use std::net::SocketAddr;
use std::sync::Arc;

use schinet_core::PlatformMessage;
use schinet_core::platform::parse_line;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::watch::WatchService;

/// Errors from the ingest endpoint.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to bind ingest endpoint on {addr}: {reason}")]
    Bind { addr: SocketAddr, reason: String },

    #[error(transparent)]
    Parse(#[from] schinet_core::Error),
}

/// Bind the ingest listener.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, IngestError> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| IngestError::Bind {
            addr,
            reason: e.to_string(),
        })
}

/// Accept gateway connections until `cancel` fires.
pub async fn serve(listener: TcpListener, service: Arc<WatchService>, cancel: CancellationToken) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Ingest endpoint listening");
    }

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "Gateway connected");
                    let service = Arc::clone(&service);
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        let count = handle_connection(stream, &service, &cancel).await;
                        info!(%peer, messages = count, "Gateway disconnected");
                    });
                }
                Err(e) => error!(error = %e, "Failed to accept gateway connection"),
            },
        }
    }
    info!("Ingest endpoint stopped");
}

/// Read NDJSON lines from one gateway connection. Returns the number of
/// messages accepted.
pub async fn handle_connection<R>(
    reader: R,
    service: &WatchService,
    cancel: &CancellationToken,
) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut accepted = 0;

    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match ingest_line(service, &line).await {
                    Ok(_) => accepted += 1,
                    Err(e) => warn!(error = %e, "Skipping malformed platform message"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Gateway read failed");
                break;
            }
        }
    }
    accepted
}

/// Parse, archive, and dispatch one line. Returns the number of sessions the
/// message was delivered to.
pub async fn ingest_line(service: &WatchService, line: &str) -> Result<usize, IngestError> {
    let msg = parse_line(line)?;
    Ok(ingest_message(service, &msg).await)
}

/// Archive a message, then hand it to the live filter. A storage failure
/// does not keep the message from live viewers.
pub async fn ingest_message(service: &WatchService, msg: &PlatformMessage) -> usize {
    if let Err(e) = service.db().record_message(msg).await {
        error!(source_id = %msg.source_id, error = %e, "Failed to archive message");
    }
    let delivered = service.dispatch(msg).await;
    debug!(source_id = %msg.source_id, delivered, "Ingested message");
    delivered
}
