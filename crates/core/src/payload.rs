//! Per-intent payloads
//!
//! The extractor's free-form `entities` object is normalized into one tagged
//! variant per intent before the engine sees it. Serialization over the wire
//! stays a plain JSON object; this union is internal.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entity::{CustomerPatch, PaymentMode};

/// How an utterance referred to a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CustomerRef {
    /// Pronominal back-reference ("uska", "same customer") or no name at all
    /// when the intent implies the active customer.
    Active,
    /// An explicit name to resolve.
    Named(String),
    /// No reference present.
    #[default]
    None,
}

impl CustomerRef {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Named(n) => Some(n),
            _ => None,
        }
    }
}

/// One spoken invoice line ("2 kg chawal").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItemSpec {
    pub product: String,
    /// Strictly positive.
    pub quantity: i64,
    pub unit: Option<String>,
}

/// Sparse reschedule for MODIFY_REMINDER.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReminderPatch {
    pub when_text: Option<String>,
    pub amount: Option<Decimal>,
    pub message: Option<String>,
}

/// Validated, intent-tagged command payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IntentPayload {
    CreateInvoice {
        customer: CustomerRef,
        items: Vec<InvoiceItemSpec>,
        auto_send: bool,
        gst: Option<bool>,
    },
    ConfirmInvoice {
        customer: CustomerRef,
    },
    ShowPendingInvoice {
        customer: CustomerRef,
    },
    ToggleGst {
        customer: CustomerRef,
        enable: Option<bool>,
    },
    CancelInvoice {
        customer: CustomerRef,
        cancel_all: bool,
    },
    CreateReminder {
        customer: CustomerRef,
        amount: Option<Decimal>,
        when_text: Option<String>,
        message: Option<String>,
    },
    CancelReminder {
        customer: CustomerRef,
        reminder_id: Option<uuid::Uuid>,
    },
    ModifyReminder {
        customer: CustomerRef,
        reminder_id: Option<uuid::Uuid>,
        patch: ReminderPatch,
    },
    ListReminders {
        customer: CustomerRef,
    },
    RecordPayment {
        customer: CustomerRef,
        amount: Option<Decimal>,
        mode: Option<PaymentMode>,
    },
    AddCredit {
        customer: CustomerRef,
        amount: Option<Decimal>,
        description: Option<String>,
    },
    CheckBalance {
        customer: CustomerRef,
    },
    CheckStock {
        product: Option<String>,
    },
    CreateCustomer {
        name: Option<String>,
        phone: Option<String>,
        patch: CustomerPatch,
    },
    UpdateCustomer {
        customer: CustomerRef,
        patch: CustomerPatch,
    },
    UpdateCustomerPhone {
        customer: CustomerRef,
        phone: Option<String>,
    },
    GetCustomerInfo {
        customer: CustomerRef,
    },
    DeleteCustomerData {
        customer: CustomerRef,
        otp: Option<String>,
    },
    ListCustomerBalances,
    TotalPendingAmount,
    DailySummary,
    SwitchLanguage {
        language: Option<String>,
    },
    ProvideEmail {
        email: Option<String>,
    },
    SendInvoice {
        customer: CustomerRef,
        channel: Option<String>,
        when_text: Option<String>,
    },
    StartRecording,
    StopRecording,
    Unknown,
}

impl IntentPayload {
    /// Customer reference, when the payload carries one.
    pub fn customer_ref(&self) -> Option<&CustomerRef> {
        match self {
            Self::CreateInvoice { customer, .. }
            | Self::ConfirmInvoice { customer }
            | Self::ShowPendingInvoice { customer }
            | Self::ToggleGst { customer, .. }
            | Self::CancelInvoice { customer, .. }
            | Self::CreateReminder { customer, .. }
            | Self::CancelReminder { customer, .. }
            | Self::ModifyReminder { customer, .. }
            | Self::ListReminders { customer }
            | Self::RecordPayment { customer, .. }
            | Self::AddCredit { customer, .. }
            | Self::CheckBalance { customer }
            | Self::UpdateCustomer { customer, .. }
            | Self::UpdateCustomerPhone { customer, .. }
            | Self::GetCustomerInfo { customer }
            | Self::DeleteCustomerData { customer, .. }
            | Self::SendInvoice { customer, .. } => Some(customer),
            _ => None,
        }
    }

    /// Monetary magnitude the confirmation gate checks against its
    /// large-amount threshold.
    pub fn amount(&self) -> Option<Decimal> {
        match self {
            Self::CreateReminder { amount, .. }
            | Self::RecordPayment { amount, .. }
            | Self::AddCredit { amount, .. } => *amount,
            _ => None,
        }
    }
}
