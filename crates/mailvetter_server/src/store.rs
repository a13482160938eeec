//! Postgres persistence for jobs and results
//!
//! Two tables: `jobs` tracks bulk upload batches, `results` stores one row
//! per verified address with the full JSON result for later re-analysis.
//! The composite `(job_id, id)` index serves the paged `ORDER BY id ASC`
//! query without a sort step.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Connect to Postgres and apply the schema migrations
pub async fn connect(db_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .acquire_timeout(Duration::from_secs(10))
        .connect(db_url)
        .await
        .context("unable to connect to database")?;

    run_migrations(&pool).await?;
    info!("connected to Postgres, migrations applied");
    Ok(pool)
}

async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            total_count INT DEFAULT 0,
            processed_count INT DEFAULT 0,
            created_at TIMESTAMP DEFAULT NOW(),
            completed_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .context("migration failed (jobs)")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS results (
            id SERIAL PRIMARY KEY,
            job_id TEXT NOT NULL REFERENCES jobs(id),
            email TEXT NOT NULL,
            score INT NOT NULL,
            data JSONB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("migration failed (results)")?;

    for index in [
        "CREATE INDEX IF NOT EXISTS idx_results_job_id ON results (job_id)",
        "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status)",
        // serves WHERE job_id = $1 ORDER BY id ASC in a single index scan
        "CREATE INDEX IF NOT EXISTS idx_results_job_id_id ON results (job_id, id)",
    ] {
        sqlx::query(index)
            .execute(pool)
            .await
            .context("migration failed (indexes)")?;
    }

    Ok(())
}

/// A row of the `jobs` table
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JobRow {
    pub id: String,
    pub status: String,
    pub total_count: i32,
    pub processed_count: i32,
    pub created_at: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<NaiveDateTime>,
}

/// A single verified email row for the results API
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ResultRow {
    pub email: String,
    pub score: i32,
    pub data: serde_json::Value,
}

/// Create a pending job with a known total
pub async fn create_job(pool: &PgPool, id: &str, total_count: i32) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO jobs (id, status, total_count) VALUES ($1, 'pending', $2)")
        .bind(id)
        .bind(total_count)
        .execute(pool)
        .await?;
    Ok(())
}

/// Fetch a job row by id
pub async fn fetch_job(pool: &PgPool, id: &str) -> sqlx::Result<Option<JobRow>> {
    sqlx::query_as::<_, JobRow>(
        "SELECT id, status, total_count, processed_count, created_at, completed_at \
         FROM jobs WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Persist one verification result and advance the job counters.
///
/// Runs as a single transaction: the result row is inserted and the job's
/// `processed_count` incremented, flipping the job to `completed` when the
/// counter reaches the total.
pub async fn record_result(
    pool: &PgPool,
    job_id: &str,
    email: &str,
    score: i32,
    data: &serde_json::Value,
) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("INSERT INTO results (job_id, email, score, data) VALUES ($1, $2, $3, $4)")
        .bind(job_id)
        .bind(email)
        .bind(score)
        .bind(data)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        UPDATE jobs
        SET processed_count = processed_count + 1,
            status = CASE WHEN processed_count + 1 >= total_count THEN 'completed' ELSE status END,
            completed_at = CASE WHEN processed_count + 1 >= total_count THEN NOW() ELSE completed_at END
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}

/// Fetch one page of results for a job, ordered by insertion
pub async fn fetch_results_page(
    pool: &PgPool,
    job_id: &str,
    limit: i64,
    offset: i64,
) -> sqlx::Result<Vec<ResultRow>> {
    sqlx::query_as::<_, ResultRow>(
        "SELECT email, score, data FROM results \
         WHERE job_id = $1 ORDER BY id ASC LIMIT $2 OFFSET $3",
    )
    .bind(job_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}
