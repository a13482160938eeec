//! Redis-backed task queue
//!
//! The API pushes JSON-encoded `{job_id, email}` tasks onto a single list;
//! workers pop with a short blocking timeout so shutdown is observed
//! promptly and an empty queue is a normal condition, not an error.

use std::time::Duration;

use anyhow::{Context, Result};
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{Deserialize, Serialize};
use tracing::info;

/// The Redis list holding pending verifications
pub const QUEUE_NAME: &str = "tasks:verify";

/// Safe batch size for a single RPUSH
const ENQUEUE_BATCH: usize = 5000;

/// A single unit of work for the worker pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub job_id: String,
    pub email: String,
}

/// Thin wrapper over a managed Redis connection
#[derive(Clone)]
pub struct QueueClient {
    conn: ConnectionManager,
}

impl QueueClient {
    /// Connect and verify the endpoint answers PING
    pub async fn connect(addr: &str) -> Result<Self> {
        let url = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("redis://{addr}")
        };
        let client = redis::Client::open(url).context("invalid Redis address")?;
        let mut conn = ConnectionManager::new(client)
            .await
            .context("connecting to Redis")?;

        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .context("redis ping failed")?;

        info!("connected to Redis at {addr}");
        Ok(Self { conn })
    }

    /// Push a job's addresses onto the queue in bounded batches
    pub async fn enqueue_batch(&self, job_id: &str, emails: &[String]) -> Result<()> {
        if emails.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();

        for chunk in emails.chunks(ENQUEUE_BATCH) {
            let mut payloads = Vec::with_capacity(chunk.len());
            for email in chunk {
                let task = Task {
                    job_id: job_id.to_string(),
                    email: email.clone(),
                };
                payloads.push(serde_json::to_string(&task)?);
            }
            conn.rpush::<_, _, ()>(QUEUE_NAME, payloads)
                .await
                .context("failed to enqueue batch")?;
        }
        Ok(())
    }

    /// Blocking pop with a timeout. `Ok(None)` is the normal empty-queue
    /// signal — the timeout elapsing is not an error.
    pub async fn pop(&self, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let reply: Option<(String, String)> = conn
            .blpop(QUEUE_NAME, timeout.as_secs_f64())
            .await
            .context("blpop failed")?;
        Ok(reply.map(|(_, payload)| payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_round_trips_through_json() {
        let task = Task {
            job_id: "7c0e".to_string(),
            email: "ada@example.com".to_string(),
        };
        let encoded = serde_json::to_string(&task).unwrap();
        assert!(encoded.contains("\"job_id\":\"7c0e\""));
        let decoded: Task = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.email, "ada@example.com");
    }
}
