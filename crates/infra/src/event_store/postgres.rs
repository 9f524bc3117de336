//! Postgres-backed event store.
//!
//! Schema lives in `crates/infra/migrations/`. Every `commit` runs in one
//! database transaction that first takes a transaction-scoped advisory lock,
//! so global positions are assigned in commit order and readers never see a
//! partial commit.
//!
//! ## Error Mapping
//!
//! | SQLx error | Postgres code | `EventStoreError` |
//! |------------|---------------|-------------------|
//! | Database (unique violation) | `23505` | `Concurrency` |
//! | Database (check violation) | `23514` | `InvalidAppend` |
//! | Database (other) | any | `InvalidAppend` |
//! | Io / PoolTimedOut / PoolClosed | n/a | `Unavailable` |
//! | Other | n/a | `InvalidAppend` |
//!
//! ## Runtime
//!
//! The `EventStore` trait is synchronous. The store owns a Tokio runtime and
//! blocks on it, so it must not be called from inside another async runtime.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{instrument, Span};

use shopkeep_core::AggregateId;

use super::r#trait::{
    next_recorded_at, validate_batch, EventStore, EventStoreError, StoredEvent, StreamAppend,
};

const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_events",
    include_str!("../../migrations/0001_events.sql"),
)];

/// Key of the advisory lock that serializes commits.
const COMMIT_LOCK_KEY: i64 = 0x5348_4f50_4b45_4550;

const SELECT_COLUMNS: &str = r#"
    SELECT
        global_position,
        event_id,
        aggregate_id,
        aggregate_type,
        sequence_number,
        event_type,
        event_version,
        occurred_at,
        recorded_at,
        payload
    FROM events
"#;

#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    runtime: Arc<tokio::runtime::Runtime>,
}

impl PostgresEventStore {
    /// Connect with a pool of up to `max_connections`.
    pub fn connect(database_url: &str, max_connections: u32) -> Result<Self, EventStoreError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| EventStoreError::Unavailable(format!("cannot start runtime: {e}")))?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect(database_url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self {
            pool,
            runtime: Arc::new(runtime),
        })
    }

    /// Apply the bundled schema. Statements are idempotent.
    pub fn migrate(&self) -> Result<(), EventStoreError> {
        self.runtime.block_on(async {
            for (name, sql) in MIGRATIONS {
                for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                    sqlx::query(statement)
                        .execute(&self.pool)
                        .await
                        .map_err(|e| map_sqlx_error(name, e))?;
                }
                tracing::info!(migration = name, "migration applied");
            }
            Ok::<(), EventStoreError>(())
        })
    }

    #[instrument(
        skip(self, appends),
        fields(streams = appends.len(), committed_events = tracing::field::Empty),
        err
    )]
    async fn commit_async(
        &self,
        appends: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        validate_batch(&appends)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(COMMIT_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("advisory_lock", e))?;

        // Check every stream before writing anything. Dropping `tx` on an
        // early return rolls it back.
        let mut versions = Vec::with_capacity(appends.len());
        for append in &appends {
            let (current, existing_type) = stream_state(&mut tx, append.aggregate_id).await?;
            if !append.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {}: expected {:?}, found {current}",
                    append.aggregate_id, append.expected_version
                )));
            }
            if let Some(existing) = existing_type {
                if existing != append.aggregate_type && !append.is_guard() {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{existing}', attempted append with '{}'",
                        append.aggregate_type
                    )));
                }
            }
            versions.push(current);
        }

        let mut last_recorded_at: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(recorded_at) FROM events")
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("last_recorded_at", e))?;

        let mut committed = Vec::new();
        for (append, current) in appends.into_iter().zip(versions) {
            let mut next_sequence = current + 1;
            for event in append.events {
                let recorded_at =
                    next_recorded_at(last_recorded_at, Utc::now().trunc_subsecs(6));
                last_recorded_at = Some(recorded_at);

                let row = sqlx::query(
                    r#"
                    INSERT INTO events (
                        event_id,
                        aggregate_id,
                        aggregate_type,
                        sequence_number,
                        event_type,
                        event_version,
                        occurred_at,
                        recorded_at,
                        payload
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    RETURNING global_position
                    "#,
                )
                .bind(event.event_id)
                .bind(event.aggregate_id.as_uuid())
                .bind(&event.aggregate_type)
                .bind(next_sequence as i64)
                .bind(&event.event_type)
                .bind(event.event_version as i32)
                .bind(event.occurred_at)
                .bind(recorded_at)
                .bind(&event.payload)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        EventStoreError::Concurrency(format!(
                            "concurrent append detected: {} #{next_sequence} already exists",
                            event.aggregate_id
                        ))
                    } else {
                        map_sqlx_error("insert_event", e)
                    }
                })?;

                let global_position: i64 = row
                    .try_get("global_position")
                    .map_err(|e| map_sqlx_error("insert_event", e))?;

                committed.push(StoredEvent {
                    event_id: event.event_id,
                    aggregate_id: event.aggregate_id,
                    aggregate_type: event.aggregate_type,
                    sequence_number: next_sequence,
                    global_position: global_position as u64,
                    event_type: event.event_type,
                    event_version: event.event_version,
                    occurred_at: event.occurred_at,
                    recorded_at,
                    payload: event.payload,
                });
                next_sequence += 1;
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("committed_events", committed.len());
        Ok(committed)
    }

    #[instrument(skip(self), err)]
    async fn load_stream_async(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE aggregate_id = $1 ORDER BY sequence_number ASC"
        ))
        .bind(aggregate_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        decode_rows(rows)
    }

    #[instrument(skip(self), err)]
    async fn load_where_type(
        &self,
        aggregate_type: Option<&str>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = match aggregate_type {
            Some(t) => {
                sqlx::query(&format!(
                    "{SELECT_COLUMNS} WHERE aggregate_type = $1 ORDER BY global_position ASC"
                ))
                .bind(t)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY global_position ASC"))
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| map_sqlx_error("load_events", e))?;

        decode_rows(rows)
    }
}

impl EventStore for PostgresEventStore {
    fn commit(&self, appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.runtime.block_on(self.commit_async(appends))
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.runtime.block_on(self.load_stream_async(aggregate_id))
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.runtime.block_on(self.load_where_type(None))
    }

    fn load_by_type(&self, aggregate_type: &str) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.runtime.block_on(self.load_where_type(Some(aggregate_type)))
    }
}

/// Current version and type of a stream, read inside the commit transaction.
async fn stream_state(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_id: AggregateId,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(MAX(sequence_number), 0) AS current_version,
            MAX(aggregate_type) AS aggregate_type
        FROM events
        WHERE aggregate_id = $1
        "#,
    )
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("stream_state", e))?;

    let current_version: i64 = row
        .try_get("current_version")
        .map_err(|e| map_sqlx_error("stream_state", e))?;
    let aggregate_type: Option<String> = row
        .try_get("aggregate_type")
        .map_err(|e| map_sqlx_error("stream_state", e))?;

    Ok((current_version as u64, aggregate_type))
}

fn decode_rows(rows: Vec<PgRow>) -> Result<Vec<StoredEvent>, EventStoreError> {
    rows.iter()
        .map(|row| {
            StoredEventRow::from_row(row)
                .map(StoredEvent::from)
                .map_err(|e| EventStoreError::Serialization(format!("failed to read event row: {e}")))
        })
        .collect()
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => EventStoreError::Concurrency(msg),
                _ => EventStoreError::InvalidAppend(msg),
            }
        }
        sqlx::Error::Io(e) => {
            EventStoreError::Unavailable(format!("io error in {operation}: {e}"))
        }
        sqlx::Error::PoolTimedOut => {
            EventStoreError::Unavailable(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        other => EventStoreError::InvalidAppend(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

struct StoredEventRow {
    global_position: i64,
    event_id: uuid::Uuid,
    aggregate_id: uuid::Uuid,
    aggregate_type: String,
    sequence_number: i64,
    event_type: String,
    event_version: i32,
    occurred_at: DateTime<Utc>,
    recorded_at: DateTime<Utc>,
    payload: serde_json::Value,
}

impl<'r> FromRow<'r, PgRow> for StoredEventRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEventRow {
            global_position: row.try_get("global_position")?,
            event_id: row.try_get("event_id")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            sequence_number: row.try_get("sequence_number")?,
            event_type: row.try_get("event_type")?,
            event_version: row.try_get("event_version")?,
            occurred_at: row.try_get("occurred_at")?,
            recorded_at: row.try_get("recorded_at")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl From<StoredEventRow> for StoredEvent {
    fn from(row: StoredEventRow) -> Self {
        StoredEvent {
            event_id: row.event_id,
            aggregate_id: AggregateId::from_uuid(row.aggregate_id),
            aggregate_type: row.aggregate_type,
            sequence_number: row.sequence_number as u64,
            global_position: row.global_position as u64,
            event_type: row.event_type,
            event_version: row.event_version as u32,
            occurred_at: row.occurred_at,
            recorded_at: row.recorded_at,
            payload: row.payload,
        }
    }
}
