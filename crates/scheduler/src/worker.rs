//! Reminder worker
//!
//! Polls the delayed-job queue, loads each due reminder, delivers it over
//! every channel, and records the outcome. Failures re-enqueue with backoff
//! up to a bounded attempt count (at-least-once delivery; the channels
//! tolerate duplicates, the database does not — `mark_sent` is idempotent).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dukaan_voice_core::ReminderStatus;
use dukaan_voice_store::{CustomerStore, ReminderStore};
use tokio::sync::watch;

use crate::channels::ReminderChannel;
use crate::queue::{job_id, parse_job_id, JobQueue};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Bounded attempts per reminder, including the first.
    pub max_attempts: i32,
    /// Backoff per retry, multiplied by the attempt number.
    pub retry_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 20,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(60),
        }
    }
}

/// The worker. `run` drives the poll loop until the shutdown signal flips;
/// in-flight deliveries finish before it returns (graceful drain).
pub struct ReminderWorker {
    queue: Arc<dyn JobQueue>,
    reminders: Arc<dyn ReminderStore>,
    customers: Arc<dyn CustomerStore>,
    channels: Vec<Arc<dyn ReminderChannel>>,
    config: WorkerConfig,
}

impl ReminderWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        reminders: Arc<dyn ReminderStore>,
        customers: Arc<dyn CustomerStore>,
        channels: Vec<Arc<dyn ReminderChannel>>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            reminders,
            customers,
            channels,
            config,
        }
    }

    /// Poll loop. Returns when `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!("Reminder worker started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.drain_due().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Reminder worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One poll round: pop due jobs and process each.
    pub async fn drain_due(&self) {
        let due = match self.queue.pop_due(Utc::now(), self.config.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!(error = %e, "Queue poll failed");
                return;
            }
        };

        for job in due {
            let Some(reminder_id) = parse_job_id(&job) else {
                tracing::warn!(job = %job, "Unparsable job id dropped");
                continue;
            };
            self.process(reminder_id).await;
        }
    }

    async fn process(&self, reminder_id: uuid::Uuid) {
        let reminder = match self.reminders.get(reminder_id).await {
            Ok(Some(reminder)) => reminder,
            Ok(None) => {
                tracing::warn!(reminder_id = %reminder_id, "Reminder row missing, dropping job");
                return;
            }
            Err(e) => {
                tracing::warn!(reminder_id = %reminder_id, error = %e, "Reminder load failed");
                return;
            }
        };

        // cancelled (or already sent) rows may still have a late job in flight
        if reminder.status != ReminderStatus::Pending && reminder.status != ReminderStatus::Failed {
            tracing::debug!(
                reminder_id = %reminder_id,
                status = reminder.status.as_str(),
                "Skipping non-pending reminder"
            );
            return;
        }

        let customer = match self.customers.get(reminder.customer_id).await {
            Ok(Some(customer)) => customer,
            _ => {
                tracing::warn!(reminder_id = %reminder_id, "Customer gone, dropping reminder");
                return;
            }
        };

        let mut delivered_any = false;
        let mut last_error = None;
        for channel in &self.channels {
            if !reminder.channels.iter().any(|c| c == channel.kind()) {
                continue;
            }
            match channel.deliver(&reminder, &customer).await {
                Ok(()) => delivered_any = true,
                Err(e) => {
                    tracing::warn!(
                        reminder_id = %reminder_id,
                        channel = channel.kind(),
                        error = %e,
                        "Channel delivery failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        if delivered_any {
            if let Err(e) = self.reminders.mark_sent(reminder_id, Utc::now()).await {
                tracing::error!(reminder_id = %reminder_id, error = %e, "mark_sent failed");
            } else {
                tracing::info!(reminder_id = %reminder_id, "Reminder delivered");
            }
            return;
        }

        // every channel failed: record the attempt, maybe retry
        let failed = match self.reminders.mark_failed(reminder_id, Utc::now()).await {
            Ok(failed) => failed,
            Err(e) => {
                tracing::error!(reminder_id = %reminder_id, error = %e, "mark_failed failed");
                return;
            }
        };

        if failed.retry_count < self.config.max_attempts {
            let delay = self.config.retry_backoff * failed.retry_count.max(1) as u32;
            let due = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
            match self.queue.enqueue(&job_id(reminder_id), due).await {
                Ok(_) => tracing::info!(
                    reminder_id = %reminder_id,
                    attempt = failed.retry_count,
                    retry_at = %due,
                    "Reminder retry scheduled"
                ),
                Err(e) => tracing::error!(
                    reminder_id = %reminder_id,
                    error = %e,
                    "Retry enqueue failed"
                ),
            }
        } else {
            tracing::warn!(
                reminder_id = %reminder_id,
                attempts = failed.retry_count,
                error = last_error.map(|e| e.to_string()).unwrap_or_default(),
                "Reminder gave up after max attempts"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryJobQueue;
    use crate::SchedulerError;
    use async_trait::async_trait;
    use dukaan_voice_core::{Customer, Reminder};
    use dukaan_voice_store::MemStore;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    struct RecordingChannel {
        kind: &'static str,
        delivered: Mutex<Vec<Uuid>>,
        fail: bool,
    }

    impl RecordingChannel {
        fn new(kind: &'static str, fail: bool) -> Self {
            Self {
                kind,
                delivered: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl ReminderChannel for RecordingChannel {
        fn kind(&self) -> &'static str {
            self.kind
        }

        async fn deliver(
            &self,
            reminder: &Reminder,
            _customer: &Customer,
        ) -> Result<(), SchedulerError> {
            if self.fail {
                return Err(SchedulerError::Delivery("provider down".to_string()));
            }
            self.delivered.lock().push(reminder.id);
            Ok(())
        }
    }

    fn make_reminder(customer_id: Uuid) -> Reminder {
        Reminder {
            id: Uuid::new_v4(),
            customer_id,
            amount: Decimal::from(500),
            scheduled_at: Utc::now() - chrono::Duration::minutes(1),
            channels: vec!["whatsapp".to_string()],
            message: "payment due".to_string(),
            notes: "500".to_string(),
            status: ReminderStatus::Pending,
            retry_count: 0,
            last_attempt_at: None,
            sent_at: None,
            created_at: Utc::now(),
        }
    }

    async fn setup(
        fail: bool,
    ) -> (
        Arc<MemStore>,
        Arc<InMemoryJobQueue>,
        Arc<RecordingChannel>,
        ReminderWorker,
        Uuid,
    ) {
        let store = Arc::new(MemStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let channel = Arc::new(RecordingChannel::new("whatsapp", fail));

        let mut customer = Customer::new("Bharat");
        customer.phone = Some("9876543210".to_string());
        let customer = store.seed_customer(customer);

        let reminder = make_reminder(customer.id);
        ReminderStore::insert(&*store, reminder.clone()).await.unwrap();
        queue
            .enqueue(&job_id(reminder.id), reminder.scheduled_at)
            .await
            .unwrap();

        let worker = ReminderWorker::new(
            queue.clone(),
            store.clone(),
            store.clone(),
            vec![channel.clone()],
            WorkerConfig {
                max_attempts: 2,
                ..WorkerConfig::default()
            },
        );
        (store, queue, channel, worker, reminder.id)
    }

    #[tokio::test]
    async fn successful_delivery_marks_sent() {
        let (store, queue, channel, worker, reminder_id) = setup(false).await;

        worker.drain_due().await;

        assert_eq!(channel.delivered.lock().len(), 1);
        let stored = ReminderStore::get(&*store, reminder_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Sent);
        assert!(stored.sent_at.is_some());
        assert_eq!(queue.pending_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failure_retries_then_gives_up() {
        let (store, queue, _channel, worker, reminder_id) = setup(true).await;

        // attempt 1: fails, re-enqueued with backoff
        worker.drain_due().await;
        let stored = ReminderStore::get(&*store, reminder_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Failed);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(queue.pending_len().await.unwrap(), 1);

        // force the retry due and run attempt 2: exhausts max_attempts
        queue.remove(&job_id(reminder_id)).await.unwrap();
        queue
            .enqueue(&job_id(reminder_id), Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();
        worker.drain_due().await;

        let stored = ReminderStore::get(&*store, reminder_id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 2);
        assert_eq!(queue.pending_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancelled_reminder_is_skipped() {
        let (store, queue, channel, worker, reminder_id) = setup(false).await;
        ReminderStore::cancel(&*store, reminder_id).await.unwrap();
        // job left in queue to simulate a cancellation race
        assert_eq!(queue.pending_len().await.unwrap(), 1);

        worker.drain_due().await;

        assert!(channel.delivered.lock().is_empty());
        let stored = ReminderStore::get(&*store, reminder_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Cancelled);
    }
}
