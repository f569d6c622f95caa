//! Persisted entity models
//!
//! Shapes and invariants of everything the data services own. Sign
//! convention: a positive customer balance means the customer owes the shop.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A shop customer. Names are not unique; disambiguation happens at
/// resolution time via fuzzy match and landmark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub nickname: Option<String>,
    pub landmark: Option<String>,
    pub area: Option<String>,
    pub city: Option<String>,
    /// Digits only, 10-15.
    pub phone: Option<String>,
    pub email: Option<String>,
    pub gstin: Option<String>,
    pub pan: Option<String>,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            nickname: None,
            landmark: None,
            area: None,
            city: None,
            phone: None,
            email: None,
            gstin: None,
            pan: None,
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Sparse update for UPDATE_CUSTOMER. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerPatch {
    pub name: Option<String>,
    pub nickname: Option<String>,
    pub landmark: Option<String>,
    pub area: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub gstin: Option<String>,
    pub pan: Option<String>,
}

impl CustomerPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.nickname.is_none()
            && self.landmark.is_none()
            && self.area.is_none()
            && self.city.is_none()
            && self.phone.is_none()
            && self.email.is_none()
            && self.gstin.is_none()
            && self.pan.is_none()
    }
}

/// A catalogue product. Auto-created at price zero and flagged new when an
/// invoice references an unknown name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    /// kg / piece / packet / litre ...
    pub unit: String,
    pub price: Decimal,
    pub stock: i64,
    pub is_new: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Confirmed,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(Self::Draft),
            "CONFIRMED" => Some(Self::Confirmed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i64,
    /// Snapshot of the product price at invoice time.
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// An invoice. Invariant: sum of line totals plus GST (when on) equals
/// `total` to two decimal places.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub total: Decimal,
    pub status: InvoiceStatus,
    pub gst: bool,
    /// Session that created the invoice; drafts are recovered through it.
    pub session_id: Option<String>,
    pub items: Vec<InvoiceItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryType {
    OpeningBalance,
    Debit,
    Credit,
}

impl LedgerEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpeningBalance => "OPENING_BALANCE",
            Self::Debit => "DEBIT",
            Self::Credit => "CREDIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPENING_BALANCE" => Some(Self::OpeningBalance),
            "DEBIT" => Some(Self::Debit),
            "CREDIT" => Some(Self::Credit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMode {
    Cash,
    Upi,
    Card,
    Other,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Upi => "upi",
            Self::Card => "card",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "cash" | "nakad" | "nagad" => Some(Self::Cash),
            "upi" | "gpay" | "phonepe" | "paytm" | "online" => Some(Self::Upi),
            "card" | "debit card" | "credit card" => Some(Self::Card),
            "other" | "cheque" | "check" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Append-only ledger entry. For every customer,
/// `balance == Σ DEBIT + Σ OPENING_BALANCE − Σ CREDIT` after every
/// committed transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub entry_type: LedgerEntryType,
    /// Strictly positive.
    pub amount: Decimal,
    /// Required iff `entry_type == Credit`.
    pub payment_mode: Option<PaymentMode>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A scheduled payment reminder. Queue discipline: exactly one queued job
/// per reminder id at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub amount: Decimal,
    pub scheduled_at: DateTime<Utc>,
    /// Delivery channels, e.g. ["whatsapp", "email"].
    pub channels: Vec<String>,
    pub message: String,
    /// Amount rendered as a string, kept for audit parity with the message.
    pub notes: String,
    pub status: ReminderStatus,
    pub retry_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

/// Persisted conversation-session metadata. Bounded to the lifetime of the
/// underlying duplex connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    /// BCP-47, default "hi".
    pub language: String,
    pub metadata: serde_json::Value,
}

/// DAILY_SUMMARY aggregate for one session-calendar day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailySummary {
    pub total_sales: Decimal,
    pub total_payments: Decimal,
    pub payments_by_mode: Vec<(String, Decimal)>,
    pub pending_amount: Decimal,
    pub invoice_count: i64,
}
