//! Viewer mode: the process on the other end of a watch session.
//!
//! Dials the relay, identifies itself with its process id, and prints every
//! line it receives until it sees its own shutdown line or the relay hangs up.

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// How a viewer session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerExit {
    /// The relay sent this viewer's shutdown line.
    Killed,
    /// The relay closed the connection.
    Disconnected,
}

/// Connect to `host:port` and copy relayed lines to `out`.
pub async fn run_viewer<W>(
    host: &str,
    port: u16,
    pid: u32,
    mut out: W,
) -> std::io::Result<ViewerExit>
where
    W: AsyncWrite + Unpin,
{
    let mut stream = TcpStream::connect((host, port)).await?;
    stream.write_all(format!("{pid}\n").as_bytes()).await?;
    stream.flush().await?;
    info!(host, port, pid, "Viewer connected");

    let sentinel = format!("{pid}die");
    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        if line == sentinel {
            debug!(pid, "Shutdown line received");
            return Ok(ViewerExit::Killed);
        }
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await?;
    }

    info!(host, port, "Relay closed the connection");
    Ok(ViewerExit::Disconnected)
}
