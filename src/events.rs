//! Progress and warning reporting
//!
//! The engine publishes every executed migration, and every policy-demoted
//! warning, through an [`EventSink`]. Both channels are optional and
//! bounded with capacity 1: if a channel is configured, publishing waits
//! for the consumer, so callers must drain it concurrently with the engine
//! call. A dropped receiver turns publishing into a no-op.

use tokio::sync::mpsc;

use crate::error::MigrateError;
use crate::migration::Migration;

/// Capacity for caller-built notification channels
pub const EVENT_CHANNEL_CAPACITY: usize = 1;

#[derive(Debug, Default)]
pub(crate) struct EventSink {
    migrations: Option<mpsc::Sender<Migration>>,
    errors: Option<mpsc::Sender<MigrateError>>,
}

impl EventSink {
    pub fn new(
        migrations: Option<mpsc::Sender<Migration>>,
        errors: Option<mpsc::Sender<MigrateError>>,
    ) -> EventSink {
        EventSink { migrations, errors }
    }

    /// Report a successfully executed migration
    pub async fn migration_applied(&self, migration: Migration) {
        if let Some(tx) = &self.migrations {
            let _ = tx.send(migration).await;
        }
    }

    /// Report a non-fatal warning
    pub async fn warning(&self, error: MigrateError) {
        tracing::warn!(%error, "non-fatal migration warning");
        if let Some(tx) = &self.errors {
            let _ = tx.send(error).await;
        }
    }

    /// Drop both senders so consumers observe end-of-stream. Called once,
    /// from `Migrator::close`, which consumes the migrator.
    pub fn close(&mut self) {
        self.migrations = None;
        self.errors = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::Direction;
    use chrono::Utc;

    #[tokio::test]
    async fn publishes_to_drained_channels() {
        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let sink = EventSink::new(Some(tx), None);

        let migration = Migration {
            version: Utc::now(),
            name: "create_posts_table".to_string(),
            direction: Direction::Up,
            dialect: None,
            applied_at: None,
        };

        let consumer = tokio::spawn(async move { rx.recv().await });
        sink.migration_applied(migration.clone()).await;
        assert_eq!(consumer.await.unwrap(), Some(migration));
    }

    #[tokio::test]
    async fn dropped_receiver_is_tolerated() {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        drop(rx);
        let sink = EventSink::new(None, Some(tx));
        sink.warning(MigrateError::EmptyQuery).await;
    }

    #[tokio::test]
    async fn close_ends_the_stream() {
        let (tx, mut rx) = mpsc::channel::<Migration>(EVENT_CHANNEL_CAPACITY);
        let mut sink = EventSink::new(Some(tx), None);
        sink.close();
        assert_eq!(rx.recv().await, None);
    }
}
