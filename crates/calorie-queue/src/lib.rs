//! FIFO durable queue of estimation jobs with blocking pop. A single queue name backs a single producer/consumer
//! domain; many workers compete for the same list via `BRPOP`.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use calorie_core::types::EstimateJob;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

/// The single FIFO list name jobs are pushed to and popped from.
pub const QUEUE_NAME: &str = "estimate_jobs";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("store error: {0}")]
    Store(String),

    #[error("malformed job payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Named interface the dispatcher (producer) and worker (consumer) depend
/// on. `dequeue` blocks up to `timeout` and returns `None` if nothing
/// arrived — it never distinguishes "empty" from "timed out".
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &EstimateJob) -> Result<Uuid>;
    async fn dequeue(&self, timeout: Duration) -> Result<Option<EstimateJob>>;
}

/// Redis-list-backed implementation using `LPUSH` (producer) and `BRPOP`
/// (consumer), giving strict FIFO ordering within a single queue name.
pub struct RedisJobQueue {
    client: redis::Client,
    queue_name: String,
}

impl RedisJobQueue {
    pub fn new(redis_url: &str) -> Result<Self> {
        Self::with_queue_name(redis_url, QUEUE_NAME)
    }

    pub fn with_queue_name(redis_url: &str, queue_name: &str) -> Result<Self> {
        let client =
            redis::Client::open(redis_url).map_err(|e| QueueError::Store(e.to_string()))?;
        Ok(Self {
            client,
            queue_name: queue_name.to_string(),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Store(e.to_string()))
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &EstimateJob) -> Result<Uuid> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.connection().await?;
        redis::cmd("LPUSH")
            .arg(&self.queue_name)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::Store(e.to_string()))?;
        Ok(job.job_id)
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<EstimateJob>> {
        let mut conn = self.connection().await?;
        let timeout_secs = timeout.as_secs().max(1);
        let reply: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.queue_name)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Store(e.to_string()))?;

        match reply {
            Some((_key, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

/// In-process FIFO queue for tests and the gateway's local-dev mode (no
/// Redis required). A `Notify` wakes waiting `dequeue` callers rather than
/// polling, and `enqueue` always pushes to the front so `dequeue` popping
/// from the back preserves strict FIFO order.
#[derive(Default)]
pub struct InMemoryJobQueue {
    jobs: Mutex<VecDeque<EstimateJob>>,
    notify: Notify,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: &EstimateJob) -> Result<Uuid> {
        let mut jobs = self.jobs.lock().await;
        jobs.push_front(job.clone());
        self.notify.notify_one();
        Ok(job.job_id)
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<EstimateJob>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut jobs = self.jobs.lock().await;
                if let Some(job) = jobs.pop_back() {
                    return Ok(Some(job));
                }
            }
            let notified = self.notify.notified();
            tokio::select! {
                _ = notified => continue,
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }
}
