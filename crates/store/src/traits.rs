//! Store traits
//!
//! Named operations with ACID semantics: one transactional write per intent.
//! Implementations must uphold the ledger invariant
//! (`balance == Σ DEBIT + Σ OPENING_BALANCE − Σ CREDIT`) and the stock
//! invariant after every committed call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dukaan_voice_core::{
    Customer, CustomerPatch, DailySummary, Invoice, LedgerEntry, PaymentMode, Product, Reminder,
    SessionRecord,
};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::StoreError;

/// GST applied when an invoice has the flag on.
pub const GST_RATE_PERCENT: i64 = 18;

/// One line of a new invoice, still by product name; the store resolves the
/// product (auto-creating unknown names at price zero) inside the same
/// transaction that reserves stock.
#[derive(Debug, Clone)]
pub struct NewInvoiceLine {
    pub product: String,
    pub quantity: i64,
    pub unit: Option<String>,
}

/// Input for the invoice-creation transaction.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub customer_id: Uuid,
    pub session_id: Option<String>,
    pub lines: Vec<NewInvoiceLine>,
    pub gst: bool,
    /// Promote to CONFIRMED inside the same transaction (autoSend).
    pub auto_confirm: bool,
}

/// What a full customer purge removed.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PurgeReport {
    pub invoices: usize,
    pub ledger_entries: usize,
    pub reminders: usize,
    pub sessions_touched: usize,
}

#[async_trait]
pub trait CustomerStore: Send + Sync {
    /// Insert a customer. Fails with `DuplicatePhone` when another customer
    /// already owns the same non-empty phone.
    async fn create(&self, customer: Customer) -> Result<Customer, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Customer>, StoreError>;

    /// Apply a sparse patch. Phone uniqueness is enforced here too.
    async fn update(&self, id: Uuid, patch: CustomerPatch) -> Result<Customer, StoreError>;

    /// Search by name (case-insensitive substring), phone substring, or
    /// e-mail substring.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Customer>, StoreError>;

    async fn list(&self) -> Result<Vec<Customer>, StoreError>;

    /// Σ of positive balances: what the shop is owed.
    async fn total_outstanding(&self) -> Result<Decimal, StoreError>;

    /// Cascade-delete the customer and every child row (invoices and their
    /// items, ledger entries, reminders, session references) in one
    /// transaction. OTP gating happens in the engine.
    async fn purge(&self, id: Uuid) -> Result<PurgeReport, StoreError>;
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<Product>, StoreError>;
    async fn list(&self) -> Result<Vec<Product>, StoreError>;
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// The draft-invoice transaction: resolve each line's product
    /// (auto-create at price 0, flagged new), reserve stock, insert the
    /// invoice + line rows with snapshot prices, append the DEBIT ledger
    /// entry, and move the customer balance — all or nothing.
    async fn create(&self, new: NewInvoice) -> Result<Invoice, StoreError>;

    /// DRAFT → CONFIRMED. No ledger/stock changes; those moved at creation.
    async fn confirm(&self, invoice_id: Uuid) -> Result<Invoice, StoreError>;

    /// Compensating transaction: CANCELLED status, CREDIT entry equal to
    /// the original total, stock restored, balance reduced.
    async fn cancel(&self, invoice_id: Uuid) -> Result<Invoice, StoreError>;

    /// Cancel every non-CANCELLED invoice for the customer (or for the
    /// session when no customer is given). Returns the cancelled invoices.
    async fn cancel_all(
        &self,
        customer_id: Option<Uuid>,
        session_id: Option<&str>,
    ) -> Result<Vec<Invoice>, StoreError>;

    async fn get(&self, invoice_id: Uuid) -> Result<Option<Invoice>, StoreError>;

    /// DRAFT invoices created by this session.
    async fn drafts_for_session(&self, session_id: &str) -> Result<Vec<Invoice>, StoreError>;

    /// The session's DRAFT for one customer, if any (at most one).
    async fn draft_for_customer(
        &self,
        session_id: &str,
        customer_id: Uuid,
    ) -> Result<Option<Invoice>, StoreError>;

    /// Latest CONFIRMED invoice for a customer (SEND_INVOICE target).
    async fn latest_confirmed(&self, customer_id: Uuid) -> Result<Option<Invoice>, StoreError>;

    /// Flip the GST flag on a draft and recompute its total and ledger
    /// impact in one transaction.
    async fn set_gst(&self, invoice_id: Uuid, enable: bool) -> Result<Invoice, StoreError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// CREDIT entry + balance decrement. Returns the new balance.
    async fn record_payment(
        &self,
        customer_id: Uuid,
        amount: Decimal,
        mode: PaymentMode,
    ) -> Result<Decimal, StoreError>;

    /// DEBIT entry (non-empty description required) + balance increment.
    /// Returns the new balance.
    async fn add_credit(
        &self,
        customer_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> Result<Decimal, StoreError>;

    /// OPENING_BALANCE entry; permitted at most once per customer.
    async fn set_opening_balance(
        &self,
        customer_id: Uuid,
        amount: Decimal,
    ) -> Result<Decimal, StoreError>;

    async fn entries(&self, customer_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Aggregates for one calendar day given as a UTC window.
    async fn daily_summary(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<DailySummary, StoreError>;
}

#[async_trait]
pub trait ReminderStore: Send + Sync {
    async fn insert(&self, reminder: Reminder) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Reminder>, StoreError>;

    /// Idempotent on reminder id: a second call leaves `sent_at` untouched.
    async fn mark_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Status `failed`, retry count incremented, last attempt stamped.
    async fn mark_failed(&self, id: Uuid, at: DateTime<Utc>) -> Result<Reminder, StoreError>;

    async fn cancel(&self, id: Uuid) -> Result<(), StoreError>;

    async fn reschedule(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
        amount: Option<Decimal>,
        message: Option<String>,
    ) -> Result<Reminder, StoreError>;

    async fn list_for_customer(&self, customer_id: Uuid) -> Result<Vec<Reminder>, StoreError>;

    /// Most recently created pending reminder for a customer, for
    /// cancel/modify without an explicit id.
    async fn latest_pending(&self, customer_id: Uuid) -> Result<Option<Reminder>, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, record: SessionRecord) -> Result<(), StoreError>;
    async fn end(&self, id: &str) -> Result<(), StoreError>;
    /// Merge one key into the session's opaque metadata.
    async fn set_metadata(
        &self,
        id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError>;
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>, StoreError>;
}
