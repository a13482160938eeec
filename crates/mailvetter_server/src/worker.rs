//! Queue-driven worker pool
//!
//! A fixed-size pool of tasks pops verifications off the Redis queue,
//! runs each under its own five-minute deadline, and persists the result
//! in one transaction. Persistence failures log and drop the task — the
//! queue message is already consumed at that point.

use std::sync::Arc;
use std::time::Duration;

use mailvetter_core::Verifier;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::queue::{QueueClient, Task};
use crate::store;

/// Blocking-pop timeout: short enough that shutdown feels instant, long
/// enough to avoid hammering Redis when the queue is empty
const POP_TIMEOUT: Duration = Duration::from_secs(2);
/// Back-off after a queue error so a Redis outage does not spin-loop
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);
/// Ceiling for one verification; a hung probe recycles the worker slot
/// within bounded time
const JOB_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Everything a worker needs to process tasks
#[derive(Clone)]
pub struct WorkerContext {
    pub verifier: Arc<Verifier>,
    pub db: PgPool,
    pub queue: QueueClient,
}

/// Run `concurrency` workers until the shutdown channel flips, then wait
/// for in-flight jobs to finish.
pub async fn run_pool(
    context: WorkerContext,
    concurrency: usize,
    shutdown: watch::Receiver<bool>,
) {
    info!("starting worker pool with {concurrency} concurrent workers");

    let mut workers = JoinSet::new();
    for worker_id in 1..=concurrency {
        workers.spawn(worker_loop(context.clone(), worker_id, shutdown.clone()));
    }

    while workers.join_next().await.is_some() {}
    info!("all workers exited, pool shut down");
}

async fn worker_loop(context: WorkerContext, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            debug!("[worker {worker_id}] shutdown observed, exiting");
            return;
        }

        let popped = tokio::select! {
            popped = context.queue.pop(POP_TIMEOUT) => popped,
            _ = shutdown.changed() => {
                debug!("[worker {worker_id}] shutdown observed mid-pop, exiting");
                return;
            }
        };

        let payload = match popped {
            // the pop timed out on an empty queue: completely normal
            Ok(None) => continue,
            Ok(Some(payload)) => payload,
            Err(e) => {
                warn!("[worker {worker_id}] queue pop failed: {e}, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(QUEUE_ERROR_BACKOFF) => {}
                    _ = shutdown.changed() => return,
                }
                continue;
            }
        };

        let task: Task = match serde_json::from_str(&payload) {
            Ok(task) => task,
            Err(e) => {
                warn!("[worker {worker_id}] malformed task skipped: {payload:?} ({e})");
                continue;
            }
        };

        process_task(&context, worker_id, task).await;
    }
}

async fn process_task(context: &WorkerContext, worker_id: usize, task: Task) {
    let deadline = Instant::now() + JOB_DEADLINE;
    let result = context
        .verifier
        .verify_with_deadline(&task.email, deadline)
        .await;

    let data = match serde_json::to_value(&result) {
        Ok(data) => data,
        Err(e) => {
            warn!("[worker {worker_id}] failed to serialize result for {}: {e}", task.email);
            return;
        }
    };

    match store::record_result(
        &context.db,
        &task.job_id,
        &task.email,
        i32::from(result.score),
        &data,
    )
    .await
    {
        Ok(()) => {
            info!(
                "[worker {worker_id}] processed {} (score {}, {:?})",
                task.email, result.score, result.status
            );
        }
        Err(e) => {
            // the task is already off the queue; the verification is lost
            warn!("[worker {worker_id}] failed to persist {}: {e}", task.email);
        }
    }
}
