//! Delayed-job queue
//!
//! One queued job per reminder id, keyed by the deterministic id
//! `reminder-{uuid}`. The redis implementation is a sorted set scored by the
//! due instant (`ZADD NX` gives the exactly-one-enqueue guarantee); the
//! in-memory implementation backs tests and single-process deployments.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::SchedulerError;

const QUEUE_KEY: &str = "jobs:send-reminder";

/// Deterministic job id for a reminder.
pub fn job_id(reminder_id: Uuid) -> String {
    format!("reminder-{reminder_id}")
}

/// Recover the reminder id from a job id.
pub fn parse_job_id(job_id: &str) -> Option<Uuid> {
    job_id.strip_prefix("reminder-")?.parse().ok()
}

/// Delayed-job queue contract.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job due at `due`. Returns `false` when a job with this id
    /// is already queued (the call is a no-op then).
    async fn enqueue(&self, job_id: &str, due: DateTime<Utc>) -> Result<bool, SchedulerError>;

    /// Remove a queued job. Returns whether it was present.
    async fn remove(&self, job_id: &str) -> Result<bool, SchedulerError>;

    /// Pop up to `limit` due jobs (due <= now). Popped jobs are gone from
    /// the queue; a worker that fails re-enqueues explicitly.
    async fn pop_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, SchedulerError>;

    async fn pending_len(&self) -> Result<usize, SchedulerError>;
}

/// In-memory queue ordered by due time.
#[derive(Default)]
pub struct InMemoryJobQueue {
    // (due_ms, job_id) gives due-time ordering with id tiebreak
    jobs: Mutex<BTreeSet<(i64, String)>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job_id: &str, due: DateTime<Utc>) -> Result<bool, SchedulerError> {
        let mut jobs = self.jobs.lock();
        if jobs.iter().any(|(_, id)| id == job_id) {
            return Ok(false);
        }
        jobs.insert((due.timestamp_millis(), job_id.to_string()));
        Ok(true)
    }

    async fn remove(&self, job_id: &str) -> Result<bool, SchedulerError> {
        let mut jobs = self.jobs.lock();
        let found: Option<(i64, String)> = jobs
            .iter()
            .find(|(_, id)| id == job_id)
            .cloned();
        match found {
            Some(entry) => {
                jobs.remove(&entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn pop_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, SchedulerError> {
        let cutoff = now.timestamp_millis();
        let mut jobs = self.jobs.lock();
        let due: Vec<(i64, String)> = jobs
            .iter()
            .take_while(|(at, _)| *at <= cutoff)
            .take(limit)
            .cloned()
            .collect();
        for entry in &due {
            jobs.remove(entry);
        }
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    async fn pending_len(&self) -> Result<usize, SchedulerError> {
        Ok(self.jobs.lock().len())
    }
}

/// Redis sorted-set queue.
pub struct RedisJobQueue {
    conn: redis::aio::ConnectionManager,
}

impl RedisJobQueue {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job_id: &str, due: DateTime<Utc>) -> Result<bool, SchedulerError> {
        let mut conn = self.conn.clone();
        let added: i64 = redis::cmd("ZADD")
            .arg(QUEUE_KEY)
            .arg("NX")
            .arg(due.timestamp_millis())
            .arg(job_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| SchedulerError::Queue(e.to_string()))?;
        Ok(added == 1)
    }

    async fn remove(&self, job_id: &str) -> Result<bool, SchedulerError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("ZREM")
            .arg(QUEUE_KEY)
            .arg(job_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| SchedulerError::Queue(e.to_string()))?;
        Ok(removed == 1)
    }

    async fn pop_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, SchedulerError> {
        let mut conn = self.conn.clone();
        // atomic claim: pop the earliest entries, push back any not yet due
        let popped: Vec<(String, f64)> = redis::cmd("ZPOPMIN")
            .arg(QUEUE_KEY)
            .arg(limit as i64)
            .query_async(&mut conn)
            .await
            .map_err(|e| SchedulerError::Queue(e.to_string()))?;

        let cutoff = now.timestamp_millis() as f64;
        let mut due = Vec::with_capacity(popped.len());
        for (job_id, score) in popped {
            if score <= cutoff {
                due.push(job_id);
            } else {
                let _: () = redis::cmd("ZADD")
                    .arg(QUEUE_KEY)
                    .arg("NX")
                    .arg(score)
                    .arg(&job_id)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| SchedulerError::Queue(e.to_string()))?;
            }
        }
        Ok(due)
    }

    async fn pending_len(&self) -> Result<usize, SchedulerError> {
        let mut conn = self.conn.clone();
        let len: usize = redis::cmd("ZCARD")
            .arg(QUEUE_KEY)
            .query_async(&mut conn)
            .await
            .map_err(|e| SchedulerError::Queue(e.to_string()))?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn job_id_round_trips() {
        let id = Uuid::new_v4();
        assert_eq!(parse_job_id(&job_id(id)), Some(id));
        assert_eq!(parse_job_id("garbage"), None);
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_refused() {
        let queue = InMemoryJobQueue::new();
        let due = Utc::now();
        assert!(queue.enqueue("reminder-x", due).await.unwrap());
        assert!(!queue.enqueue("reminder-x", due + Duration::hours(1)).await.unwrap());
        assert_eq!(queue.pending_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pop_due_respects_cutoff() {
        let queue = InMemoryJobQueue::new();
        let now = Utc::now();
        queue.enqueue("a", now - Duration::minutes(5)).await.unwrap();
        queue.enqueue("b", now - Duration::minutes(1)).await.unwrap();
        queue.enqueue("c", now + Duration::minutes(10)).await.unwrap();

        let due = queue.pop_due(now, 10).await.unwrap();
        assert_eq!(due, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(queue.pending_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn remove_is_exact() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue("a", Utc::now()).await.unwrap();
        assert!(queue.remove("a").await.unwrap());
        assert!(!queue.remove("a").await.unwrap());
    }
}
