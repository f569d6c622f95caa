//! Delivery channels
//!
//! The worker fans a due reminder out to every configured channel. E-mail
//! goes through SMTP here; WhatsApp delivery lives in an external adapter,
//! so the trait ships with a logging stub that deployments replace.

use async_trait::async_trait;
use dukaan_voice_core::{Customer, Reminder};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::SchedulerError;

/// One outbound channel for reminder delivery.
#[async_trait]
pub trait ReminderChannel: Send + Sync {
    /// Channel key as stored on the reminder row ("whatsapp", "email").
    fn kind(&self) -> &'static str;

    async fn deliver(&self, reminder: &Reminder, customer: &Customer)
        -> Result<(), SchedulerError>;
}

/// Plain e-mail sender, shared by the reminder channel and the deletion-OTP
/// path.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), SchedulerError>;
}

/// SMTP mailer over lettre's async transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        from: &str,
    ) -> Result<Self, SchedulerError> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| SchedulerError::Validation(format!("bad from address: {e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| SchedulerError::Delivery(e.to_string()))?
            .port(port);
        if !username.is_empty() {
            builder = builder.credentials(Credentials::new(
                username.to_string(),
                password.to_string(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), SchedulerError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| SchedulerError::Validation(format!("bad recipient: {e}")))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| SchedulerError::Delivery(e.to_string()))?;
        self.transport
            .send(message)
            .await
            .map_err(|e| SchedulerError::Delivery(e.to_string()))?;
        Ok(())
    }
}

/// Logging stub used when no SMTP credentials are configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), SchedulerError> {
        tracing::info!(to = %to, subject = %subject, chars = body.len(), "E-mail (stub) dispatched");
        Ok(())
    }
}

/// E-mail reminder channel. Skips customers without an address rather than
/// failing the whole delivery.
pub struct EmailSender {
    mailer: std::sync::Arc<dyn Mailer>,
}

impl EmailSender {
    pub fn new(mailer: std::sync::Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl ReminderChannel for EmailSender {
    fn kind(&self) -> &'static str {
        "email"
    }

    async fn deliver(
        &self,
        reminder: &Reminder,
        customer: &Customer,
    ) -> Result<(), SchedulerError> {
        let Some(email) = customer.email.as_deref().filter(|e| !e.is_empty()) else {
            tracing::debug!(customer_id = %customer.id, "No e-mail on file, skipping channel");
            return Ok(());
        };
        self.mailer
            .send(email, "Payment reminder", &reminder.message)
            .await
    }
}

/// WhatsApp adapter seam. Real delivery is an external collaborator; this
/// trait is what it plugs into.
#[async_trait]
pub trait WhatsAppChannel: Send + Sync {
    async fn send_message(&self, phone: &str, text: &str) -> Result<(), SchedulerError>;
}

/// Logging stub standing in for the WhatsApp adapter.
pub struct LogWhatsApp;

#[async_trait]
impl WhatsAppChannel for LogWhatsApp {
    async fn send_message(&self, phone: &str, text: &str) -> Result<(), SchedulerError> {
        tracing::info!(phone = %phone, chars = text.len(), "WhatsApp reminder (stub) dispatched");
        Ok(())
    }
}

/// `ReminderChannel` face of the WhatsApp adapter.
pub struct WhatsAppSender {
    adapter: std::sync::Arc<dyn WhatsAppChannel>,
}

impl WhatsAppSender {
    pub fn new(adapter: std::sync::Arc<dyn WhatsAppChannel>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl ReminderChannel for WhatsAppSender {
    fn kind(&self) -> &'static str {
        "whatsapp"
    }

    async fn deliver(
        &self,
        reminder: &Reminder,
        customer: &Customer,
    ) -> Result<(), SchedulerError> {
        let Some(phone) = customer.phone.as_deref().filter(|p| !p.is_empty()) else {
            return Err(SchedulerError::Validation(format!(
                "{} has no phone number",
                customer.name
            )));
        };
        self.adapter.send_message(phone, &reminder.message).await
    }
}
