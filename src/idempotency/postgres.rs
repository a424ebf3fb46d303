//! PostgreSQL-backed idempotency store. The conditional insert is
//! `INSERT .. ON CONFLICT DO NOTHING`; a zero row count means another worker
//! won the race and its record is fetched and returned untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::messaging::ResponseEnvelope;

use super::{IdempotencyError, IdempotencyRecord, IdempotencyResult, IdempotencyStore, InsertOutcome};

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS processed_requests (
    id           VARCHAR(128) PRIMARY KEY,
    response     JSONB NOT NULL,
    completed_at TIMESTAMPTZ NOT NULL
)
"#;

#[derive(Debug, Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    /// Wrap an existing connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a dedicated pool
    pub async fn connect(database_url: &str) -> IdempotencyResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create the backing table if it does not exist.
    ///
    /// Retention/TTL cleanup of old records is a deployment concern and is
    /// left to operators.
    pub async fn migrate(&self) -> IdempotencyResult<()> {
        sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
        debug!("processed_requests table ready");
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn get(&self, request_id: &str) -> IdempotencyResult<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            "SELECT response, completed_at FROM processed_requests WHERE id = $1",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let response_json: serde_json::Value = row.try_get("response")?;
        let completed_at: DateTime<Utc> = row.try_get("completed_at")?;
        let response: ResponseEnvelope = serde_json::from_value(response_json)?;

        Ok(Some(IdempotencyRecord {
            request_id: request_id.to_string(),
            response,
            completed_at,
        }))
    }

    async fn insert_if_absent(
        &self,
        record: IdempotencyRecord,
    ) -> IdempotencyResult<InsertOutcome> {
        let response_json = serde_json::to_value(&record.response)?;

        let result = sqlx::query(
            "INSERT INTO processed_requests (id, response, completed_at) \
             VALUES ($1, $2, $3) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&record.request_id)
        .bind(&response_json)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(InsertOutcome::Inserted);
        }

        // Lost the race; adopt the winner's record
        match self.get(&record.request_id).await? {
            Some(winner) => Ok(InsertOutcome::AlreadyCompleted(winner)),
            None => Err(IdempotencyError::storage(
                "insert_if_absent",
                format!(
                    "conflicting record for {} disappeared between insert and read",
                    record.request_id
                ),
            )),
        }
    }
}
