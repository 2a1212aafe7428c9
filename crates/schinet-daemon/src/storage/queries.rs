//! Database queries for the SchiNET daemon.

use schinet_core::PlatformMessage;

use super::db::{Database, DatabaseError};
use super::models::{Channel, MessageRecord, Source};

impl Database {
    // =========================================================================
    // Message queries
    // =========================================================================

    /// Archive an inbound message, registering its source and channel.
    pub async fn record_message(&self, msg: &PlatformMessage) -> Result<i64, DatabaseError> {
        let source_name = if msg.source_name.is_empty() {
            msg.source_id.as_str()
        } else {
            msg.source_name.as_str()
        };

        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r"
            INSERT INTO sources (id, name) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name
            WHERE excluded.name <> excluded.id
            ",
        )
        .bind(&msg.source_id)
        .bind(source_name)
        .execute(&mut *tx)
        .await?;

        if !msg.channel_id.is_empty() {
            sqlx::query(
                r"
                INSERT INTO channels (id, source_id, name) VALUES (?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET name = excluded.name
                ",
            )
            .bind(&msg.channel_id)
            .bind(&msg.source_id)
            .bind(&msg.channel_name)
            .execute(&mut *tx)
            .await?;
        }

        let result = sqlx::query(
            r"
            INSERT INTO messages
                (source_id, channel_id, channel_name, author_name, author_discriminator, content, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&msg.source_id)
        .bind(&msg.channel_id)
        .bind(&msg.channel_name)
        .bind(&msg.author_name)
        .bind(&msg.author_discriminator)
        .bind(&msg.content)
        .bind(msg.timestamp_or_now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent messages for a source, newest first.
    ///
    /// `channel_id` narrows the result to one channel.
    pub async fn fetch_recent(
        &self,
        source_id: &str,
        channel_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, DatabaseError> {
        let records = if let Some(channel_id) = channel_id {
            sqlx::query_as::<_, MessageRecord>(
                "SELECT * FROM messages WHERE source_id = ? AND channel_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
            )
            .bind(source_id)
            .bind(channel_id)
            .bind(limit)
            .fetch_all(self.pool())
            .await?
        } else {
            sqlx::query_as::<_, MessageRecord>(
                "SELECT * FROM messages WHERE source_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
            )
            .bind(source_id)
            .bind(limit)
            .fetch_all(self.pool())
            .await?
        };

        Ok(records)
    }

    // =========================================================================
    // Source / channel queries
    // =========================================================================

    /// All known sources, ordered by name.
    pub async fn list_sources(&self) -> Result<Vec<Source>, DatabaseError> {
        let sources = sqlx::query_as::<_, Source>("SELECT * FROM sources ORDER BY name ASC, id ASC")
            .fetch_all(self.pool())
            .await?;
        Ok(sources)
    }

    /// Channels of a source, ordered by name.
    pub async fn list_channels(&self, source_id: &str) -> Result<Vec<Channel>, DatabaseError> {
        let channels = sqlx::query_as::<_, Channel>(
            "SELECT * FROM channels WHERE source_id = ? ORDER BY name ASC, id ASC",
        )
        .bind(source_id)
        .fetch_all(self.pool())
        .await?;
        Ok(channels)
    }
}
