//! Entity-bag normalization
//!
//! Turns the extractor's free-form `entities` object into the typed
//! per-intent payload the engine dispatches on. All the repair work the LLM
//! cannot be trusted with happens here: transliteration of name fields,
//! spoken-digit phone assembly, numeric coercion, customer/name fallback,
//! and pronominal back-reference detection.

use dukaan_voice_core::{
    CustomerPatch, CustomerRef, Intent, IntentPayload, InvoiceItemSpec, PaymentMode, ReminderPatch,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::numbers::{coerce_amount, parse_spoken_digits};
use crate::transliterate::{contains_devanagari, transliterate};

/// Pronominal / back-reference patterns that resolve to the active customer.
static BACK_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(uska|usko|usse|iska|isko|unka|unko|wahi|same customer|pichh?la customer|us ?ka|previous customer)\b",
    )
    .unwrap()
});

/// True when the raw utterance refers back to the customer under discussion.
pub fn detects_back_reference(raw_text: &str) -> bool {
    BACK_REFERENCE.is_match(raw_text)
}

/// String entity, transliterated out of Devanagari if the LLM ignored the
/// Roman-script instruction.
fn name_field(entities: &Value, key: &str) -> Option<String> {
    let raw = entities.get(key)?.as_str()?.trim();
    if raw.is_empty() {
        return None;
    }
    if contains_devanagari(raw) {
        Some(transliterate(raw))
    } else {
        Some(raw.to_string())
    }
}

fn string_field(entities: &Value, key: &str) -> Option<String> {
    let raw = entities.get(key)?.as_str()?.trim();
    (!raw.is_empty()).then(|| raw.to_string())
}

fn bool_field(entities: &Value, key: &str) -> Option<bool> {
    match entities.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "yes" | "haan" | "ha" => Some(true),
            "false" | "no" | "nahi" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Customer reference: explicit `customerRef: "active"` wins, then the
/// `customer` field (falling back to `name`), then nothing.
fn customer_ref(entities: &Value, raw_text: &str) -> CustomerRef {
    if entities.get("customerRef").and_then(Value::as_str) == Some("active")
        || detects_back_reference(raw_text)
    {
        return CustomerRef::Active;
    }
    if let Some(name) = name_field(entities, "customer").or_else(|| name_field(entities, "name")) {
        return CustomerRef::Named(name);
    }
    CustomerRef::None
}

/// Phone: prefer an explicit digits-only field, then spoken-digit assembly
/// from the field text, then from the raw utterance.
fn phone_field(entities: &Value, raw_text: &str) -> Option<String> {
    if let Some(raw) = string_field(entities, "phone") {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if (10..=15).contains(&digits.len()) {
            return Some(digits);
        }
        if let Some(parsed) = parse_spoken_digits(&raw) {
            return Some(parsed);
        }
    }
    parse_spoken_digits(raw_text)
}

fn quantity_field(item: &Value) -> Option<i64> {
    match item.get("quantity")? {
        Value::Number(n) => n.as_i64().filter(|q| *q > 0),
        Value::String(s) => s.trim().parse::<i64>().ok().filter(|q| *q > 0),
        _ => None,
    }
}

fn items_field(entities: &Value) -> Vec<InvoiceItemSpec> {
    let Some(items) = entities.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let product = name_field(item, "product").or_else(|| name_field(item, "name"))?;
            let quantity = quantity_field(item).unwrap_or(1);
            Some(InvoiceItemSpec {
                product,
                quantity,
                unit: string_field(item, "unit"),
            })
        })
        .collect()
}

fn customer_patch(entities: &Value) -> CustomerPatch {
    CustomerPatch {
        name: name_field(entities, "newName"),
        nickname: name_field(entities, "nickname"),
        landmark: name_field(entities, "landmark"),
        area: name_field(entities, "area"),
        city: name_field(entities, "city"),
        phone: None, // phone goes through spoken-digit assembly separately
        email: string_field(entities, "email"),
        gstin: string_field(entities, "gstin"),
        pan: string_field(entities, "pan"),
    }
}

/// Build the typed payload for an intent from the repaired entity bag and
/// the raw utterance.
pub fn build_payload(intent: Intent, entities: &Value, raw_text: &str) -> IntentPayload {
    let customer = customer_ref(entities, raw_text);

    match intent {
        Intent::CreateInvoice => IntentPayload::CreateInvoice {
            customer,
            items: items_field(entities),
            auto_send: bool_field(entities, "autoSend").unwrap_or(false),
            gst: bool_field(entities, "gst"),
        },
        Intent::ConfirmInvoice => IntentPayload::ConfirmInvoice { customer },
        Intent::ShowPendingInvoice => IntentPayload::ShowPendingInvoice { customer },
        Intent::ToggleGst => IntentPayload::ToggleGst {
            customer,
            enable: bool_field(entities, "gst").or_else(|| bool_field(entities, "enable")),
        },
        Intent::CancelInvoice => IntentPayload::CancelInvoice {
            customer,
            cancel_all: bool_field(entities, "cancelAll").unwrap_or(false),
        },
        Intent::CreateReminder => IntentPayload::CreateReminder {
            customer,
            amount: entities.get("amount").and_then(coerce_amount),
            when_text: string_field(entities, "when")
                .or_else(|| string_field(entities, "time"))
                .or_else(|| string_field(entities, "date")),
            message: string_field(entities, "message"),
        },
        Intent::CancelReminder => IntentPayload::CancelReminder {
            customer,
            reminder_id: string_field(entities, "reminderId").and_then(|s| s.parse().ok()),
        },
        Intent::ModifyReminder => IntentPayload::ModifyReminder {
            customer,
            reminder_id: string_field(entities, "reminderId").and_then(|s| s.parse().ok()),
            patch: ReminderPatch {
                when_text: string_field(entities, "when").or_else(|| string_field(entities, "time")),
                amount: entities.get("amount").and_then(coerce_amount),
                message: string_field(entities, "message"),
            },
        },
        Intent::ListReminders => IntentPayload::ListReminders { customer },
        Intent::RecordPayment => IntentPayload::RecordPayment {
            customer,
            amount: entities.get("amount").and_then(coerce_amount),
            mode: string_field(entities, "paymentMode")
                .or_else(|| string_field(entities, "mode"))
                .and_then(|s| PaymentMode::parse(&s)),
        },
        Intent::AddCredit => IntentPayload::AddCredit {
            customer,
            amount: entities.get("amount").and_then(coerce_amount),
            description: string_field(entities, "description")
                .or_else(|| string_field(entities, "reason")),
        },
        Intent::CheckBalance => IntentPayload::CheckBalance { customer },
        Intent::CheckStock => IntentPayload::CheckStock {
            product: name_field(entities, "product").or_else(|| name_field(entities, "item")),
        },
        Intent::CreateCustomer => IntentPayload::CreateCustomer {
            name: name_field(entities, "customer").or_else(|| name_field(entities, "name")),
            phone: phone_field(entities, raw_text),
            patch: customer_patch(entities),
        },
        Intent::UpdateCustomer => IntentPayload::UpdateCustomer {
            customer,
            patch: customer_patch(entities),
        },
        Intent::UpdateCustomerPhone => IntentPayload::UpdateCustomerPhone {
            customer,
            phone: phone_field(entities, raw_text),
        },
        Intent::GetCustomerInfo => IntentPayload::GetCustomerInfo { customer },
        Intent::DeleteCustomerData => IntentPayload::DeleteCustomerData {
            customer,
            otp: string_field(entities, "otp").map(|s| {
                s.chars().filter(|c| c.is_ascii_digit()).collect::<String>()
            }),
        },
        Intent::ListCustomerBalances => IntentPayload::ListCustomerBalances,
        Intent::TotalPendingAmount => IntentPayload::TotalPendingAmount,
        Intent::DailySummary => IntentPayload::DailySummary,
        Intent::SwitchLanguage => IntentPayload::SwitchLanguage {
            language: string_field(entities, "language")
                .or_else(|| string_field(entities, "lang")),
        },
        Intent::ProvideEmail => IntentPayload::ProvideEmail {
            email: string_field(entities, "email"),
        },
        Intent::SendInvoice => IntentPayload::SendInvoice {
            customer,
            channel: string_field(entities, "channel"),
            when_text: string_field(entities, "when"),
        },
        Intent::StartRecording => IntentPayload::StartRecording,
        Intent::StopRecording => IntentPayload::StopRecording,
        Intent::Unknown => IntentPayload::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;

    #[test]
    fn back_reference_patterns() {
        assert!(detects_back_reference("usko 300 add karo"));
        assert!(detects_back_reference("same customer ka bill"));
        assert!(detects_back_reference("pichla customer"));
        assert!(!detects_back_reference("Bharat ko 500 add karo"));
    }

    #[test]
    fn customer_falls_back_to_name_field() {
        let payload = build_payload(
            Intent::CheckBalance,
            &json!({"name": "Bharat"}),
            "Bharat ka balance",
        );
        let IntentPayload::CheckBalance { customer } = payload else {
            panic!("wrong variant");
        };
        assert_eq!(customer, CustomerRef::Named("Bharat".to_string()));
    }

    #[test]
    fn pronoun_resolves_to_active() {
        let payload = build_payload(
            Intent::AddCredit,
            &json!({"amount": 300}),
            "usko 300 add karo",
        );
        let IntentPayload::AddCredit { customer, amount, .. } = payload else {
            panic!("wrong variant");
        };
        assert_eq!(customer, CustomerRef::Active);
        assert_eq!(amount, Some(Decimal::from(300)));
    }

    #[test]
    fn devanagari_names_are_transliterated() {
        let payload = build_payload(
            Intent::CheckBalance,
            &json!({"customer": "राहुल"}),
            "balance batao",
        );
        let IntentPayload::CheckBalance { customer } = payload else {
            panic!("wrong variant");
        };
        assert_eq!(customer, CustomerRef::Named("rahul".to_string()));
    }

    #[test]
    fn invoice_items_with_string_quantities() {
        let payload = build_payload(
            Intent::CreateInvoice,
            &json!({
                "customer": "Rahul",
                "items": [
                    {"product": "chawal", "quantity": "2", "unit": "kg"},
                    {"product": "biscuit", "quantity": 3, "unit": "packet"}
                ]
            }),
            "2 kg chawal aur 3 packet biscuit ka bill",
        );
        let IntentPayload::CreateInvoice { items, auto_send, .. } = payload else {
            panic!("wrong variant");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].quantity, 2);
        assert_eq!(items[1].quantity, 3);
        assert!(!auto_send);
    }

    #[test]
    fn spoken_phone_digits_assemble() {
        let payload = build_payload(
            Intent::UpdateCustomerPhone,
            &json!({"customer": "Rahul", "phone": "nau eight saat six five four three two one zero"}),
            "Rahul ka number update karo",
        );
        let IntentPayload::UpdateCustomerPhone { phone, .. } = payload else {
            panic!("wrong variant");
        };
        assert_eq!(phone, Some("9876543210".to_string()));
    }

    #[test]
    fn amount_strings_coerce() {
        let payload = build_payload(
            Intent::RecordPayment,
            &json!({"customer": "Mohan", "amount": "5 hazar", "paymentMode": "upi"}),
            "Mohan ne 5 hazar diye upi se",
        );
        let IntentPayload::RecordPayment { amount, mode, .. } = payload else {
            panic!("wrong variant");
        };
        assert_eq!(amount, Some(Decimal::from(5000)));
        assert_eq!(mode, Some(PaymentMode::Upi));
    }
}
