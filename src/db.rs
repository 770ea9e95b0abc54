use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DriftError, Result};
use crate::models::DriftRecord;

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres drift log for one monitoring session. Rows are ordered by a
/// sequence column so loads return insertion order.
pub struct PgDriftLog {
    pool: PgPool,
    session_id: Uuid,
}

impl PgDriftLog {
    /// Registers a new, empty session.
    pub async fn create(pool: PgPool, label: Option<&str>) -> Result<Self> {
        let session_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO flaretrace.drift_sessions (id, label)
            VALUES ($1, $2)
            "#,
        )
        .bind(session_id)
        .bind(label)
        .execute(&pool)
        .await?;
        debug!(%session_id, "created drift log session");
        Ok(Self { pool, session_id })
    }

    /// Attaches to an existing session id; existence is checked on access.
    pub fn open(pool: PgPool, session_id: Uuid) -> Self {
        Self { pool, session_id }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Writes the batch in one transaction: all rows land or none do.
    pub async fn append(&self, records: &[DriftRecord]) -> Result<()> {
        self.ensure_session().await?;
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO flaretrace.drift_records
                (session_id, start_at, end_at, feature, score, threshold, is_drifted)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(self.session_id)
            .bind(record.window_start)
            .bind(record.window_end)
            .bind(&record.feature)
            .bind(record.score)
            .bind(record.threshold)
            .bind(record.is_drifted)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(session_id = %self.session_id, appended = records.len(), "appended drift records");
        Ok(())
    }

    pub async fn load(&self) -> Result<Vec<DriftRecord>> {
        self.ensure_session().await?;
        let rows = sqlx::query(
            r#"
            SELECT start_at, end_at, feature, score, threshold, is_drifted
            FROM flaretrace.drift_records
            WHERE session_id = $1
            ORDER BY seq
            "#,
        )
        .bind(self.session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    pub async fn query_overlapping(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DriftRecord>> {
        self.ensure_session().await?;
        let rows = sqlx::query(
            r#"
            SELECT start_at, end_at, feature, score, threshold, is_drifted
            FROM flaretrace.drift_records
            WHERE session_id = $1 AND start_at <= $3 AND end_at >= $2
            ORDER BY seq
            "#,
        )
        .bind(self.session_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    async fn ensure_session(&self) -> Result<()> {
        let exists: bool = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM flaretrace.drift_sessions WHERE id = $1) AS present",
        )
        .bind(self.session_id)
        .fetch_one(&self.pool)
        .await?
        .get("present");
        if exists {
            Ok(())
        } else {
            Err(DriftError::LogNotFound(format!("session {}", self.session_id)))
        }
    }
}

fn record_from_row(row: &PgRow) -> DriftRecord {
    DriftRecord {
        window_start: row.get("start_at"),
        window_end: row.get("end_at"),
        feature: row.get("feature"),
        score: row.get("score"),
        threshold: row.get("threshold"),
        is_drifted: row.get("is_drifted"),
    }
}
