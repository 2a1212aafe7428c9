//! Backlog replay for a freshly attached viewer.
//!
//! Lines are enqueued oldest first, ahead of any live event enqueued after
//! [`prime_backlog`] returns. Live events that arrive while the fetch is in
//! flight may land before the backlog; that window is accepted.

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::filter::format_line;
use super::types::{RelayFrame, SessionSnapshot, WatchError};
use crate::storage::Database;

/// Fetch the `count` most recent archived messages for the session's source
/// (and channel, when scoped) and enqueue them in chronological order.
///
/// Returns the number of lines enqueued.
pub async fn prime_backlog(
    db: &Database,
    session: &SessionSnapshot,
    count: i64,
    queue: &mpsc::UnboundedSender<RelayFrame>,
) -> Result<usize, WatchError> {
    if count <= 0 {
        return Ok(0);
    }
    let limit = u32::try_from(count).unwrap_or(u32::MAX);

    let mut records = db
        .fetch_recent(&session.source.id, session.scope.channel_id(), limit)
        .await?;
    records.reverse();

    let mut enqueued = 0;
    for record in &records {
        let line = format_line(
            &session.scope,
            &record.channel_name,
            &record.author_name,
            &record.author_discriminator,
            &record.content,
        );
        if queue.send(RelayFrame::Line(line)).is_err() {
            debug!(session_id = %session.id, enqueued, "Session closed during backlog replay");
            break;
        }
        enqueued += 1;
    }

    info!(session_id = %session.id, requested = count, enqueued, "Backlog replayed");
    Ok(enqueued)
}
