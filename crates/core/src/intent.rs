//! Intent vocabulary
//!
//! The closed set of operator intents the extractor may emit. Anything
//! outside this set is clamped to `Unknown` during post-processing.

use serde::{Deserialize, Serialize};

/// Operator intent, extracted from a final transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    CreateInvoice,
    ConfirmInvoice,
    ShowPendingInvoice,
    ToggleGst,
    CancelInvoice,
    CreateReminder,
    CancelReminder,
    ModifyReminder,
    ListReminders,
    RecordPayment,
    AddCredit,
    CheckBalance,
    CheckStock,
    CreateCustomer,
    UpdateCustomer,
    UpdateCustomerPhone,
    GetCustomerInfo,
    DeleteCustomerData,
    ListCustomerBalances,
    TotalPendingAmount,
    DailySummary,
    SwitchLanguage,
    ProvideEmail,
    SendInvoice,
    StartRecording,
    StopRecording,
    Unknown,
}

impl Intent {
    /// Wire name (SCREAMING_SNAKE_CASE, matches the extractor contract).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateInvoice => "CREATE_INVOICE",
            Self::ConfirmInvoice => "CONFIRM_INVOICE",
            Self::ShowPendingInvoice => "SHOW_PENDING_INVOICE",
            Self::ToggleGst => "TOGGLE_GST",
            Self::CancelInvoice => "CANCEL_INVOICE",
            Self::CreateReminder => "CREATE_REMINDER",
            Self::CancelReminder => "CANCEL_REMINDER",
            Self::ModifyReminder => "MODIFY_REMINDER",
            Self::ListReminders => "LIST_REMINDERS",
            Self::RecordPayment => "RECORD_PAYMENT",
            Self::AddCredit => "ADD_CREDIT",
            Self::CheckBalance => "CHECK_BALANCE",
            Self::CheckStock => "CHECK_STOCK",
            Self::CreateCustomer => "CREATE_CUSTOMER",
            Self::UpdateCustomer => "UPDATE_CUSTOMER",
            Self::UpdateCustomerPhone => "UPDATE_CUSTOMER_PHONE",
            Self::GetCustomerInfo => "GET_CUSTOMER_INFO",
            Self::DeleteCustomerData => "DELETE_CUSTOMER_DATA",
            Self::ListCustomerBalances => "LIST_CUSTOMER_BALANCES",
            Self::TotalPendingAmount => "TOTAL_PENDING_AMOUNT",
            Self::DailySummary => "DAILY_SUMMARY",
            Self::SwitchLanguage => "SWITCH_LANGUAGE",
            Self::ProvideEmail => "PROVIDE_EMAIL",
            Self::SendInvoice => "SEND_INVOICE",
            Self::StartRecording => "START_RECORDING",
            Self::StopRecording => "STOP_RECORDING",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parse a wire name. Tolerates lowercase and stray whitespace;
    /// anything outside the vocabulary maps to `Unknown`.
    pub fn parse(s: &str) -> Self {
        let normalized = s.trim().to_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "CREATE_INVOICE" => Self::CreateInvoice,
            "CONFIRM_INVOICE" => Self::ConfirmInvoice,
            "SHOW_PENDING_INVOICE" => Self::ShowPendingInvoice,
            "TOGGLE_GST" => Self::ToggleGst,
            "CANCEL_INVOICE" => Self::CancelInvoice,
            "CREATE_REMINDER" => Self::CreateReminder,
            "CANCEL_REMINDER" => Self::CancelReminder,
            "MODIFY_REMINDER" => Self::ModifyReminder,
            "LIST_REMINDERS" => Self::ListReminders,
            "RECORD_PAYMENT" => Self::RecordPayment,
            "ADD_CREDIT" => Self::AddCredit,
            "CHECK_BALANCE" => Self::CheckBalance,
            "CHECK_STOCK" => Self::CheckStock,
            "CREATE_CUSTOMER" => Self::CreateCustomer,
            "UPDATE_CUSTOMER" => Self::UpdateCustomer,
            "UPDATE_CUSTOMER_PHONE" => Self::UpdateCustomerPhone,
            "GET_CUSTOMER_INFO" => Self::GetCustomerInfo,
            "DELETE_CUSTOMER_DATA" => Self::DeleteCustomerData,
            "LIST_CUSTOMER_BALANCES" => Self::ListCustomerBalances,
            "TOTAL_PENDING_AMOUNT" => Self::TotalPendingAmount,
            "DAILY_SUMMARY" => Self::DailySummary,
            "SWITCH_LANGUAGE" => Self::SwitchLanguage,
            "PROVIDE_EMAIL" => Self::ProvideEmail,
            "SEND_INVOICE" => Self::SendInvoice,
            "START_RECORDING" => Self::StartRecording,
            "STOP_RECORDING" => Self::StopRecording,
            _ => Self::Unknown,
        }
    }

    /// Destructive intents that always require a spoken confirmation,
    /// independent of extraction confidence.
    pub fn is_risky(&self) -> bool {
        matches!(
            self,
            Self::DeleteCustomerData | Self::CancelInvoice | Self::CancelReminder
        )
    }

    /// Intents that reference a customer and therefore go through
    /// customer resolution before dispatch.
    pub fn references_customer(&self) -> bool {
        matches!(
            self,
            Self::CreateInvoice
                | Self::CancelInvoice
                | Self::CreateReminder
                | Self::RecordPayment
                | Self::AddCredit
                | Self::CheckBalance
                | Self::GetCustomerInfo
                | Self::UpdateCustomer
                | Self::UpdateCustomerPhone
                | Self::DeleteCustomerData
                | Self::SendInvoice
                | Self::ListReminders
        )
    }

    /// All wire names, for the extractor prompt.
    pub fn vocabulary() -> &'static [&'static str] {
        &[
            "CREATE_INVOICE",
            "CONFIRM_INVOICE",
            "SHOW_PENDING_INVOICE",
            "TOGGLE_GST",
            "CANCEL_INVOICE",
            "CREATE_REMINDER",
            "CANCEL_REMINDER",
            "MODIFY_REMINDER",
            "LIST_REMINDERS",
            "RECORD_PAYMENT",
            "ADD_CREDIT",
            "CHECK_BALANCE",
            "CHECK_STOCK",
            "CREATE_CUSTOMER",
            "UPDATE_CUSTOMER",
            "UPDATE_CUSTOMER_PHONE",
            "GET_CUSTOMER_INFO",
            "DELETE_CUSTOMER_DATA",
            "LIST_CUSTOMER_BALANCES",
            "TOTAL_PENDING_AMOUNT",
            "DAILY_SUMMARY",
            "SWITCH_LANGUAGE",
            "PROVIDE_EMAIL",
            "SEND_INVOICE",
            "START_RECORDING",
            "STOP_RECORDING",
            "UNKNOWN",
        ]
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_vocabulary() {
        for name in Intent::vocabulary() {
            let intent = Intent::parse(name);
            assert_eq!(intent.as_str(), *name);
        }
    }

    #[test]
    fn parse_tolerates_casing_and_spaces() {
        assert_eq!(Intent::parse("create invoice"), Intent::CreateInvoice);
        assert_eq!(Intent::parse(" add_credit "), Intent::AddCredit);
        assert_eq!(Intent::parse("record-payment"), Intent::RecordPayment);
    }

    #[test]
    fn out_of_vocabulary_is_unknown() {
        assert_eq!(Intent::parse("MAKE_COFFEE"), Intent::Unknown);
        assert_eq!(Intent::parse(""), Intent::Unknown);
    }

    #[test]
    fn risky_set() {
        assert!(Intent::DeleteCustomerData.is_risky());
        assert!(Intent::CancelInvoice.is_risky());
        assert!(Intent::CancelReminder.is_risky());
        assert!(!Intent::AddCredit.is_risky());
    }
}
