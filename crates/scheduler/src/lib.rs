//! Reminder scheduling
//!
//! Persists reminder rows through the data services and enqueues one delayed
//! job per reminder with the deterministic id `reminder-{id}`. The worker
//! drains due jobs and delivers over the configured channels (e-mail via
//! SMTP, WhatsApp behind an adapter trait). Delivery is at-least-once;
//! `mark_sent` is idempotent so the database never records a double send.

pub mod channels;
pub mod queue;
pub mod worker;

pub use channels::{
    EmailSender, LogMailer, LogWhatsApp, Mailer, ReminderChannel, SmtpMailer, WhatsAppChannel,
    WhatsAppSender,
};
pub use queue::{job_id, parse_job_id, InMemoryJobQueue, JobQueue, RedisJobQueue};
pub use worker::{ReminderWorker, WorkerConfig};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use dukaan_voice_core::{Reminder, ReminderStatus};
use dukaan_voice_store::{CustomerStore, ReminderStore, StoreError};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Scheduler errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("validation: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("delivery error: {0}")]
    Delivery(String),
}

/// Reminder scheduler: validation, time parsing, the insert+enqueue pair,
/// and cancellation/rescheduling with queue cleanup.
pub struct ReminderScheduler {
    reminders: Arc<dyn ReminderStore>,
    customers: Arc<dyn CustomerStore>,
    queue: Arc<dyn JobQueue>,
    tz: Tz,
}

impl ReminderScheduler {
    pub fn new(
        reminders: Arc<dyn ReminderStore>,
        customers: Arc<dyn CustomerStore>,
        queue: Arc<dyn JobQueue>,
        tz: Tz,
    ) -> Self {
        Self {
            reminders,
            customers,
            queue,
            tz,
        }
    }

    pub fn queue(&self) -> Arc<dyn JobQueue> {
        self.queue.clone()
    }

    /// Schedule a reminder. Validates the customer (must exist and have a
    /// phone), parses `when_text` in the shop timezone, inserts the row,
    /// then enqueues `reminder-{id}`. A failed enqueue flips the row to
    /// `failed` in a compensating write and propagates.
    pub async fn schedule(
        &self,
        customer_id: Uuid,
        amount: Decimal,
        when_text: &str,
        custom_message: Option<String>,
    ) -> Result<Reminder, SchedulerError> {
        if amount <= Decimal::ZERO {
            return Err(SchedulerError::Validation(
                "reminder amount must be a positive number".to_string(),
            ));
        }
        if when_text.trim().is_empty() {
            return Err(SchedulerError::Validation(
                "reminder needs a time phrase".to_string(),
            ));
        }

        let customer = self
            .customers
            .get(customer_id)
            .await?
            .ok_or(StoreError::NotFound("customer"))?;
        if customer.phone.as_deref().unwrap_or("").is_empty() {
            return Err(SchedulerError::Validation(format!(
                "{} has no phone number on file",
                customer.name
            )));
        }

        let now = Utc::now();
        let scheduled_at = dukaan_voice_nlu::parse_when(when_text, self.tz, now);

        let message = custom_message.unwrap_or_else(|| {
            format!(
                "Namaste {}! Aapka ₹{} ka payment pending hai. Kripya jaldi clear karein.",
                customer.name, amount
            )
        });

        let reminder = Reminder {
            id: Uuid::new_v4(),
            customer_id,
            amount,
            scheduled_at,
            channels: vec!["whatsapp".to_string(), "email".to_string()],
            message,
            notes: amount.to_string(),
            status: ReminderStatus::Pending,
            retry_count: 0,
            last_attempt_at: None,
            sent_at: None,
            created_at: now,
        };

        self.reminders.insert(reminder.clone()).await?;

        if let Err(e) = self.queue.enqueue(&job_id(reminder.id), scheduled_at).await {
            // compensating write: the row must not sit pending with no job
            if let Err(mark_err) = self.reminders.mark_failed(reminder.id, Utc::now()).await {
                tracing::error!(
                    reminder_id = %reminder.id,
                    error = %mark_err,
                    "Failed to mark reminder failed after enqueue error"
                );
            }
            return Err(SchedulerError::Queue(e.to_string()));
        }

        tracing::info!(
            reminder_id = %reminder.id,
            customer_id = %customer_id,
            scheduled_at = %scheduled_at,
            "Reminder scheduled"
        );

        Ok(reminder)
    }

    /// Scheduled invoice send: a reminder row with an explicit channel set
    /// and message, enqueued like any other reminder.
    pub async fn schedule_send(
        &self,
        customer_id: Uuid,
        amount: Decimal,
        at: DateTime<Utc>,
        channels: Vec<String>,
        message: String,
    ) -> Result<Reminder, SchedulerError> {
        let customer = self
            .customers
            .get(customer_id)
            .await?
            .ok_or(StoreError::NotFound("customer"))?;
        if customer.phone.as_deref().unwrap_or("").is_empty() {
            return Err(SchedulerError::Validation(format!(
                "{} has no phone number on file",
                customer.name
            )));
        }

        let reminder = Reminder {
            id: Uuid::new_v4(),
            customer_id,
            amount,
            scheduled_at: at,
            channels,
            message,
            notes: amount.to_string(),
            status: ReminderStatus::Pending,
            retry_count: 0,
            last_attempt_at: None,
            sent_at: None,
            created_at: Utc::now(),
        };

        self.reminders.insert(reminder.clone()).await?;
        if let Err(e) = self.queue.enqueue(&job_id(reminder.id), at).await {
            let _ = self.reminders.mark_failed(reminder.id, Utc::now()).await;
            return Err(SchedulerError::Queue(e.to_string()));
        }
        Ok(reminder)
    }

    /// Cancel: flip the row and drop the queued job if it is still pending.
    pub async fn cancel(&self, reminder_id: Uuid) -> Result<(), SchedulerError> {
        self.reminders.cancel(reminder_id).await?;
        let removed = self
            .queue
            .remove(&job_id(reminder_id))
            .await
            .map_err(|e| SchedulerError::Queue(e.to_string()))?;
        tracing::info!(reminder_id = %reminder_id, job_removed = removed, "Reminder cancelled");
        Ok(())
    }

    /// Reschedule: update the row, remove the old job, enqueue a new one
    /// with the same deterministic id.
    pub async fn modify(
        &self,
        reminder_id: Uuid,
        when_text: Option<&str>,
        amount: Option<Decimal>,
        message: Option<String>,
    ) -> Result<Reminder, SchedulerError> {
        let existing = self
            .reminders
            .get(reminder_id)
            .await?
            .ok_or(StoreError::NotFound("reminder"))?;

        let scheduled_at = match when_text {
            Some(text) if !text.trim().is_empty() => {
                dukaan_voice_nlu::parse_when(text, self.tz, Utc::now())
            }
            _ => existing.scheduled_at,
        };

        let updated = self
            .reminders
            .reschedule(reminder_id, scheduled_at, amount, message)
            .await?;

        let id = job_id(reminder_id);
        self.queue
            .remove(&id)
            .await
            .map_err(|e| SchedulerError::Queue(e.to_string()))?;
        self.queue
            .enqueue(&id, scheduled_at)
            .await
            .map_err(|e| SchedulerError::Queue(e.to_string()))?;

        Ok(updated)
    }

    /// Reminders for a customer, soonest first.
    pub async fn list(&self, customer_id: Uuid) -> Result<Vec<Reminder>, SchedulerError> {
        Ok(self.reminders.list_for_customer(customer_id).await?)
    }

    /// Most recent pending reminder, for cancel/modify without an id.
    pub async fn latest_pending(
        &self,
        customer_id: Uuid,
    ) -> Result<Option<Reminder>, SchedulerError> {
        Ok(self.reminders.latest_pending(customer_id).await?)
    }

    /// Timestamp helper used by SEND_INVOICE's scheduled path.
    pub fn parse_when(&self, text: &str) -> DateTime<Utc> {
        dukaan_voice_nlu::parse_when(text, self.tz, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dukaan_voice_core::Customer;
    use dukaan_voice_store::MemStore;

    fn services() -> (Arc<MemStore>, Arc<InMemoryJobQueue>, ReminderScheduler) {
        let store = Arc::new(MemStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let scheduler = ReminderScheduler::new(
            store.clone(),
            store.clone(),
            queue.clone(),
            chrono_tz::Asia::Kolkata,
        );
        (store, queue, scheduler)
    }

    fn customer_with_phone(store: &MemStore) -> Customer {
        let mut c = Customer::new("Bharat");
        c.phone = Some("9876543210".to_string());
        store.seed_customer(c)
    }

    #[tokio::test]
    async fn schedule_inserts_row_and_exactly_one_job() {
        let (store, queue, scheduler) = services();
        let c = customer_with_phone(&store);

        let reminder = scheduler
            .schedule(c.id, Decimal::from(500), "kal 7 baje", None)
            .await
            .unwrap();

        assert_eq!(reminder.status, ReminderStatus::Pending);
        assert_eq!(queue.pending_len().await.unwrap(), 1);

        // a duplicate enqueue with the same id is refused by the queue
        let inserted = queue
            .enqueue(&job_id(reminder.id), reminder.scheduled_at)
            .await
            .unwrap();
        assert!(!inserted);
        assert_eq!(queue.pending_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn schedule_requires_phone() {
        let (store, _, scheduler) = services();
        let c = store.seed_customer(Customer::new("Bina Phone"));
        let err = scheduler
            .schedule(c.id, Decimal::from(100), "kal", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[tokio::test]
    async fn cancel_leaves_no_pending_job() {
        let (store, queue, scheduler) = services();
        let c = customer_with_phone(&store);
        let reminder = scheduler
            .schedule(c.id, Decimal::from(500), "kal", None)
            .await
            .unwrap();

        scheduler.cancel(reminder.id).await.unwrap();

        assert_eq!(queue.pending_len().await.unwrap(), 0);
        let stored = ReminderStore::get(&*store, reminder.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ReminderStatus::Cancelled);
    }

    #[tokio::test]
    async fn modify_keeps_one_job_with_same_id() {
        let (store, queue, scheduler) = services();
        let c = customer_with_phone(&store);
        let reminder = scheduler
            .schedule(c.id, Decimal::from(500), "kal", None)
            .await
            .unwrap();

        scheduler
            .modify(reminder.id, Some("parso 7 baje"), None, None)
            .await
            .unwrap();

        assert_eq!(queue.pending_len().await.unwrap(), 1);
    }
}
