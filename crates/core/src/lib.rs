//! Core types for the voice back-office server
//!
//! This crate provides the foundational types used across all other crates:
//! - The closed intent vocabulary and per-intent payloads
//! - Persisted entity models (customers, products, invoices, ledger, reminders)
//! - Language definitions for response generation
//! - Money formatting helpers (decimal, banker's rounding at display)
//! - The execution-result and error-code taxonomy

pub mod entity;
pub mod intent;
pub mod language;
pub mod money;
pub mod payload;
pub mod result;

pub use entity::{
    Customer, CustomerPatch, DailySummary, Invoice, InvoiceItem, InvoiceStatus, LedgerEntry,
    LedgerEntryType, PaymentMode, Product, Reminder, ReminderStatus, SessionRecord, SessionStatus,
};
pub use intent::Intent;
pub use language::Language;
pub use money::{format_inr, round_display};
pub use payload::{CustomerRef, IntentPayload, InvoiceItemSpec, ReminderPatch};
pub use result::{ErrorCode, ExecutionResult};
