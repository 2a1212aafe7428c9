//! Per-session relay loop: drains the outbound queue to the viewer socket.
//!
//! The queue is the only serialization point between producers (event filter,
//! backlog) and this single consumer. The loop ends on a `Shutdown` frame,
//! on cancellation, when the viewer stops reading (write timeout), or when the
//! queue closes. Every exit path removes the session from the registry.

use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::registry::WatchRegistry;
use super::types::{RelayFrame, SessionId, SessionSnapshot};

/// Everything the relay loop needs besides the socket and the queue.
#[derive(Clone)]
pub struct RelayContext {
    pub session_id: SessionId,
    pub viewer_pid: String,
    /// First line sent after the handshake.
    pub greeting: String,
    pub write_timeout: Duration,
    /// Pause after each line; rapid consecutive writes were observed to lose
    /// lines on some viewers.
    pub write_delay: Duration,
    pub cancel: CancellationToken,
    pub done: CancellationToken,
    pub registry: WatchRegistry,
}

impl RelayContext {
    /// The line that tells the viewer to disconnect and exit.
    pub fn wire_sentinel(&self) -> String {
        format!("{}die", self.viewer_pid)
    }
}

/// Why a relay loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    Shutdown,
    Stalled,
    Cancelled,
    QueueClosed,
}

enum WriteOutcome {
    Written,
    Failed(std::io::Error),
    TimedOut,
}

/// Greeting sent to a newly attached viewer.
pub fn greeting(session: &SessionSnapshot) -> String {
    match session.scope.channel_name() {
        Some(channel) => format!("--> Initiated: {} on {}\n", session.source.name, channel),
        None => format!("--> Initiated: {}\n", session.source.name),
    }
}

async fn write_line<S>(stream: &mut S, line: &str, timeout: Duration) -> WriteOutcome
where
    S: AsyncWrite + Unpin,
{
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');

    let write = async {
        stream.write_all(buf.as_bytes()).await?;
        stream.flush().await
    };
    match tokio::time::timeout(timeout, write).await {
        Ok(Ok(())) => WriteOutcome::Written,
        Ok(Err(e)) => WriteOutcome::Failed(e),
        Err(_) => WriteOutcome::TimedOut,
    }
}

/// Run the relay loop to completion.
pub async fn run_relay_loop<S>(
    ctx: RelayContext,
    mut stream: S,
    mut queue: mpsc::UnboundedReceiver<RelayFrame>,
) -> RelayExit
where
    S: AsyncWrite + Unpin,
{
    let id = ctx.session_id;
    let sentinel = ctx.wire_sentinel();

    let mut exit = match write_line(&mut stream, &ctx.greeting, ctx.write_timeout).await {
        WriteOutcome::TimedOut => Some(RelayExit::Stalled),
        WriteOutcome::Failed(e) => {
            warn!(session_id = %id, error = %e, "Failed to send greeting");
            None
        }
        WriteOutcome::Written => None,
    };

    while exit.is_none() {
        let frame = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => {
                exit = Some(RelayExit::Cancelled);
                break;
            }
            frame = queue.recv() => frame,
        };

        match frame {
            Some(RelayFrame::Line(line)) => {
                if line == sentinel {
                    warn!(session_id = %id, "Skipped payload identical to the shutdown line");
                    continue;
                }
                match write_line(&mut stream, &line, ctx.write_timeout).await {
                    WriteOutcome::Written => {}
                    WriteOutcome::Failed(e) => {
                        warn!(session_id = %id, error = %e, "Relay write failed");
                    }
                    WriteOutcome::TimedOut => {
                        warn!(
                            session_id = %id,
                            timeout_secs = ctx.write_timeout.as_secs(),
                            "Viewer stopped reading"
                        );
                        exit = Some(RelayExit::Stalled);
                    }
                }
                if !ctx.write_delay.is_zero() {
                    tokio::time::sleep(ctx.write_delay).await;
                }
            }
            Some(RelayFrame::Shutdown) => {
                match write_line(&mut stream, &sentinel, ctx.write_timeout).await {
                    WriteOutcome::Written => {}
                    WriteOutcome::Failed(e) => {
                        warn!(session_id = %id, error = %e, "Could not deliver shutdown line");
                    }
                    WriteOutcome::TimedOut => {
                        warn!(session_id = %id, "Timed out delivering shutdown line");
                    }
                }
                exit = Some(RelayExit::Shutdown);
            }
            None => exit = Some(RelayExit::QueueClosed),
        }
    }

    let exit = exit.unwrap_or(RelayExit::QueueClosed);

    let _ = tokio::time::timeout(ctx.write_timeout, stream.shutdown()).await;
    queue.close();
    ctx.registry.remove(id).await;
    ctx.done.cancel();

    info!(session_id = %id, viewer_pid = %ctx.viewer_pid, ?exit, "Relay loop finished");
    exit
}
