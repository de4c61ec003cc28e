use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use super::{Commit, EventStorage, OutboxMessage, StoredSnapshot};
use crate::event_sourcing::core::{StoreError, StoredEvent};
use crate::event_sourcing::store::{ConcurrencyChecker, EventQuery};

// ============================================================================
// PostgreSQL Event Storage
// ============================================================================
//
// Tables:
// - aggregate_streams: one head row per aggregate holding current_sequence
// - event_store:       append-only events, PK (aggregate_id, sequence_number)
// - snapshots:         point-in-time state, PK (aggregate_id, last_event_sequence)
// - outbox_messages:   events waiting for the relay, ordered by position
//
// Concurrency:
// A commit locks the stream head with SELECT ... FOR UPDATE (or claims it with
// INSERT ... ON CONFLICT DO NOTHING for a new stream), compares versions and
// appends inside one transaction. The event primary key backs this up: a
// unique violation is reported as a concurrency conflict.
//
// ============================================================================

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS aggregate_streams (
        aggregate_id UUID PRIMARY KEY,
        aggregate_type TEXT NOT NULL,
        current_sequence BIGINT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS event_store (
        aggregate_id UUID NOT NULL,
        sequence_number BIGINT NOT NULL,
        event_id UUID NOT NULL UNIQUE,
        aggregate_version BIGINT NOT NULL,
        event_type TEXT NOT NULL,
        event_version INT NOT NULL,
        payload TEXT NOT NULL,
        causation_id UUID,
        correlation_id UUID,
        metadata TEXT NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (aggregate_id, sequence_number)
    )",
    "CREATE INDEX IF NOT EXISTS event_store_type_idx ON event_store (aggregate_id, event_type)",
    "CREATE TABLE IF NOT EXISTS snapshots (
        aggregate_id UUID NOT NULL,
        last_event_sequence BIGINT NOT NULL,
        aggregate_type TEXT NOT NULL,
        state TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (aggregate_id, last_event_sequence)
    )",
    "CREATE TABLE IF NOT EXISTS outbox_messages (
        position BIGSERIAL PRIMARY KEY,
        id UUID NOT NULL UNIQUE,
        aggregate_type TEXT NOT NULL,
        aggregate_id UUID NOT NULL,
        sequence_number BIGINT NOT NULL,
        event_id UUID NOT NULL,
        aggregate_version BIGINT NOT NULL,
        event_type TEXT NOT NULL,
        event_version INT NOT NULL,
        payload TEXT NOT NULL,
        causation_id UUID,
        correlation_id UUID,
        metadata TEXT NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        published_at TIMESTAMPTZ
    )",
];

const EVENT_COLUMNS: &str = "aggregate_id, sequence_number, event_id, aggregate_version, event_type, \
     event_version, payload, causation_id, correlation_id, metadata, timestamp";

const INSERT_EVENT: &str = "INSERT INTO event_store (
        aggregate_id, sequence_number, event_id, aggregate_version, event_type,
        event_version, payload, causation_id, correlation_id, metadata, timestamp
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)";

const SELECT_EVENTS: &str = "SELECT aggregate_id, sequence_number, event_id, aggregate_version, event_type,
            event_version, payload, causation_id, correlation_id, metadata, timestamp
     FROM event_store
     WHERE aggregate_id = $1
       AND ($2::BIGINT IS NULL OR sequence_number >= $2)
       AND ($3::TEXT[] IS NULL OR event_type = ANY($3))
     ORDER BY sequence_number ASC";

const INSERT_OUTBOX: &str = "INSERT INTO outbox_messages (
        id, aggregate_type, aggregate_id, sequence_number, event_id, aggregate_version,
        event_type, event_version, payload, causation_id, correlation_id, metadata,
        timestamp, created_at
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)";

#[derive(Clone)]
pub struct PostgresEventStorage {
    pool: PgPool,
}

impl PostgresEventStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create tables and indexes if they do not exist yet
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Event store schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn try_commit(&self, commit: &Commit) -> Result<(), StoreError> {
        let new_version = commit.new_version();
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT current_sequence FROM aggregate_streams WHERE aggregate_id = $1 FOR UPDATE",
        )
        .bind(commit.aggregate_id)
        .fetch_optional(&mut *tx)
        .await?;

        match current {
            Some(current) => {
                ConcurrencyChecker::verify(commit.aggregate_id, commit.expected_version, current)?;
                sqlx::query(
                    "UPDATE aggregate_streams SET current_sequence = $2, updated_at = $3
                     WHERE aggregate_id = $1",
                )
                .bind(commit.aggregate_id)
                .bind(new_version)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
            }
            None => {
                ConcurrencyChecker::verify(commit.aggregate_id, commit.expected_version, 0)?;
                let claimed = sqlx::query(
                    "INSERT INTO aggregate_streams (aggregate_id, aggregate_type, current_sequence, updated_at)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (aggregate_id) DO NOTHING",
                )
                .bind(commit.aggregate_id)
                .bind(&commit.aggregate_type)
                .bind(new_version)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;

                // Another writer created the stream between our read and insert
                if claimed.rows_affected() == 0 {
                    let actual: i64 = sqlx::query_scalar(
                        "SELECT current_sequence FROM aggregate_streams WHERE aggregate_id = $1",
                    )
                    .bind(commit.aggregate_id)
                    .fetch_one(&mut *tx)
                    .await?;
                    return Err(StoreError::ConcurrencyConflict {
                        aggregate_id: commit.aggregate_id,
                        expected: commit.expected_version,
                        actual,
                    });
                }
            }
        }

        for event in &commit.events {
            sqlx::query(INSERT_EVENT)
                .bind(event.aggregate_id)
                .bind(event.sequence_number)
                .bind(event.event_id)
                .bind(event.aggregate_version)
                .bind(&event.event_type)
                .bind(event.event_version)
                .bind(&event.payload)
                .bind(event.causation_id)
                .bind(event.correlation_id)
                .bind(&event.metadata)
                .bind(event.timestamp)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(snapshot) = &commit.snapshot {
            sqlx::query(
                "INSERT INTO snapshots (aggregate_id, last_event_sequence, aggregate_type, state, created_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (aggregate_id, last_event_sequence) DO NOTHING",
            )
            .bind(snapshot.aggregate_id)
            .bind(snapshot.last_event_sequence)
            .bind(&snapshot.aggregate_type)
            .bind(&snapshot.state)
            .bind(snapshot.created_at)
            .execute(&mut *tx)
            .await?;
        }

        for message in &commit.outbox {
            let event = &message.event;
            sqlx::query(INSERT_OUTBOX)
                .bind(message.id)
                .bind(&message.aggregate_type)
                .bind(event.aggregate_id)
                .bind(event.sequence_number)
                .bind(event.event_id)
                .bind(event.aggregate_version)
                .bind(&event.event_type)
                .bind(event.event_version)
                .bind(&event.payload)
                .bind(event.causation_id)
                .bind(event.correlation_id)
                .bind(&event.metadata)
                .bind(event.timestamp)
                .bind(message.created_at)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn event_from_row(row: &PgRow) -> Result<StoredEvent, sqlx::Error> {
    Ok(StoredEvent {
        aggregate_id: row.try_get("aggregate_id")?,
        sequence_number: row.try_get("sequence_number")?,
        event_id: row.try_get("event_id")?,
        aggregate_version: row.try_get("aggregate_version")?,
        event_type: row.try_get("event_type")?,
        event_version: row.try_get("event_version")?,
        payload: row.try_get("payload")?,
        causation_id: row.try_get("causation_id")?,
        correlation_id: row.try_get("correlation_id")?,
        metadata: row.try_get("metadata")?,
        timestamp: row.try_get("timestamp")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl EventStorage for PostgresEventStorage {
    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, StoreError> {
        let current: Option<i64> = sqlx::query_scalar(
            "SELECT current_sequence FROM aggregate_streams WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(current.unwrap_or(0)) // No row = new aggregate
    }

    async fn commit(&self, commit: Commit) -> Result<(), StoreError> {
        commit.validate_sequences()?;

        match self.try_commit(&commit).await {
            Ok(()) => {
                tracing::info!(
                    aggregate_id = %commit.aggregate_id,
                    aggregate_type = %commit.aggregate_type,
                    new_version = commit.new_version(),
                    event_count = commit.events.len(),
                    snapshot = commit.snapshot.is_some(),
                    "✅ Committed events to PostgreSQL"
                );
                Ok(())
            }
            Err(StoreError::Storage(err)) if is_unique_violation(&err) => {
                tracing::warn!(
                    aggregate_id = %commit.aggregate_id,
                    error = %err,
                    "Unique violation during append, treating as concurrency conflict"
                );
                let actual = self.current_version(commit.aggregate_id).await?;
                Err(StoreError::ConcurrencyConflict {
                    aggregate_id: commit.aggregate_id,
                    expected: commit.expected_version,
                    actual,
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError> {
        let rows = sqlx::query(SELECT_EVENTS)
            .bind(query.aggregate_id)
            .bind(query.from_sequence)
            .bind(query.event_type_list())
            .fetch_all(&self.pool)
            .await?;

        let events = rows
            .iter()
            .map(event_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            aggregate_id = %query.aggregate_id,
            count = events.len(),
            "Loaded events from PostgreSQL"
        );
        Ok(events)
    }

    async fn latest_snapshot(&self, aggregate_id: Uuid) -> Result<Option<StoredSnapshot>, StoreError> {
        let row = sqlx::query(
            "SELECT aggregate_id, last_event_sequence, aggregate_type, state, created_at
             FROM snapshots
             WHERE aggregate_id = $1
             ORDER BY last_event_sequence DESC
             LIMIT 1",
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(StoredSnapshot {
            aggregate_id: row.try_get("aggregate_id")?,
            last_event_sequence: row.try_get("last_event_sequence")?,
            aggregate_type: row.try_get("aggregate_type")?,
            state: row.try_get("state")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        }))
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>, StoreError> {
        let sql = format!(
            "SELECT id, aggregate_type, created_at, {EVENT_COLUMNS}
             FROM outbox_messages
             WHERE published_at IS NULL
             ORDER BY position ASC
             LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            messages.push(OutboxMessage {
                id: row.try_get("id")?,
                aggregate_type: row.try_get("aggregate_type")?,
                created_at: row.try_get("created_at")?,
                event: event_from_row(row)?,
            });
        }
        Ok(messages)
    }

    async fn mark_published(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query("UPDATE outbox_messages SET published_at = $2 WHERE id = ANY($1)")
            .bind(ids)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
