//! Intent extraction
//!
//! One chat-completion call per final transcript, wrapped in the
//! post-processing contract that makes the output reliable. The extractor
//! owns its own timeout: its worst-case return is
//! `{intent: UNKNOWN, confidence: 0}` — it never errors into the session.

use std::sync::Arc;
use std::time::Duration;

use dukaan_voice_core::{Intent, IntentPayload};
use dukaan_voice_llm::ChatBackend;
use serde_json::Value;

use crate::payload::build_payload;
use crate::prompt::build_messages;
use crate::transliterate::{contains_devanagari, transliterate};

/// One extracted command, post-processed and typed.
#[derive(Debug, Clone)]
pub struct ExtractedCommand {
    /// Cleaned transcript.
    pub normalized: String,
    pub intent: Intent,
    pub confidence: f32,
    /// Repaired entity bag (wire form).
    pub entities: Value,
    /// Typed per-intent payload the engine dispatches on.
    pub payload: IntentPayload,
}

impl ExtractedCommand {
    /// The guaranteed worst case.
    pub fn unknown(utterance: &str) -> Self {
        Self {
            normalized: utterance.to_string(),
            intent: Intent::Unknown,
            confidence: 0.0,
            entities: Value::Object(Default::default()),
            payload: IntentPayload::Unknown,
        }
    }
}

/// LLM-backed intent extractor.
pub struct IntentExtractor {
    backend: Arc<dyn ChatBackend>,
    timeout: Duration,
}

impl IntentExtractor {
    pub fn new(backend: Arc<dyn ChatBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Extract an intent from a final transcript. Never fails: timeouts,
    /// provider errors and unparsable output all collapse to UNKNOWN/0.
    pub async fn extract(&self, utterance: &str, context: &str) -> ExtractedCommand {
        let messages = build_messages(context, utterance);

        let response =
            match tokio::time::timeout(self.timeout, self.backend.complete(&messages)).await {
                Ok(Ok(completion)) => completion.text,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Intent extraction call failed");
                    return ExtractedCommand::unknown(utterance);
                }
                Err(_) => {
                    tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "Intent extraction timed out");
                    return ExtractedCommand::unknown(utterance);
                }
            };

        match post_process(&response, utterance) {
            Some(command) => command,
            None => {
                tracing::warn!(raw = %truncate(&response, 200), "Unparsable extractor output");
                ExtractedCommand::unknown(utterance)
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// The contract that makes extractor output reliable, not the LLM:
/// (i) pull the first balanced `{...}` out of surrounding prose,
/// (ii) clamp the intent to the vocabulary,
/// (iii) transliterate leftover Devanagari in name-ish fields,
/// (iv)-(vi) numeric/phone coercion and customer←name fill happen in the
/// payload builder, (vii) pronoun detection sets `customerRef`.
pub fn post_process(response: &str, utterance: &str) -> Option<ExtractedCommand> {
    let json = extract_first_object(response)?;
    let mut parsed: Value = serde_json::from_str(&json).ok()?;

    let intent = parsed
        .get("intent")
        .and_then(Value::as_str)
        .map(Intent::parse)
        .unwrap_or(Intent::Unknown);

    let confidence = parsed
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c.clamp(0.0, 1.0) as f32)
        .unwrap_or(0.0);

    let normalized = parsed
        .get("normalized")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(|s| transliterate(s))
        .unwrap_or_else(|| utterance.to_string());

    let mut entities = parsed
        .get_mut("entities")
        .map(Value::take)
        .filter(Value::is_object)
        .unwrap_or_else(|| Value::Object(Default::default()));

    repair_entities(&mut entities, utterance);

    let payload = build_payload(intent, &entities, utterance);

    Some(ExtractedCommand {
        normalized,
        intent,
        confidence,
        entities,
        payload,
    })
}

/// Extract the first balanced `{...}` from text that may wrap the JSON in
/// prose or code fences.
fn extract_first_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// In-place entity repair: transliterate name-ish string fields, mark the
/// active-customer back-reference, and coerce numeric strings.
fn repair_entities(entities: &mut Value, raw_text: &str) {
    let Some(map) = entities.as_object_mut() else {
        return;
    };

    for key in ["customer", "name", "product"] {
        if let Some(Value::String(s)) = map.get(key) {
            if contains_devanagari(s) {
                let romanized = transliterate(s);
                map.insert(key.to_string(), Value::String(romanized));
            }
        }
    }

    if crate::payload::detects_back_reference(raw_text) {
        map.entry("customerRef")
            .or_insert_with(|| Value::String("active".to_string()));
    }

    // numeric strings become numbers on the wire form too
    if let Some(Value::String(s)) = map.get("amount") {
        if let Ok(n) = s.trim().replace(',', "").parse::<f64>() {
            if let Some(num) = serde_json::Number::from_f64(n) {
                map.insert("amount".to_string(), Value::Number(num));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dukaan_voice_core::CustomerRef;

    #[test]
    fn balanced_object_in_prose() {
        let raw = "Sure! Here is the parse: {\"intent\": \"CHECK_BALANCE\", \
                   \"normalized\": \"Rahul ka balance\", \"entities\": {\"customer\": \"Rahul\"}, \
                   \"confidence\": 0.95} hope that helps";
        let cmd = post_process(raw, "Rahul ka balance").unwrap();
        assert_eq!(cmd.intent, Intent::CheckBalance);
        assert!((cmd.confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn nested_objects_stay_balanced() {
        let raw = r#"{"intent":"CREATE_INVOICE","normalized":"bill","entities":{"customer":"Rahul","items":[{"product":"chawal","quantity":2}]},"confidence":0.9}"#;
        let cmd = post_process(raw, "bill banao").unwrap();
        assert_eq!(cmd.intent, Intent::CreateInvoice);
    }

    #[test]
    fn braces_inside_strings_ignored() {
        let raw = r#"{"intent":"ADD_CREDIT","normalized":"note {500}","entities":{"amount":500},"confidence":0.9}"#;
        let cmd = post_process(raw, "500 likh do").unwrap();
        assert_eq!(cmd.intent, Intent::AddCredit);
    }

    #[test]
    fn unknown_intent_clamped() {
        let raw = r#"{"intent":"ORDER_PIZZA","normalized":"x","entities":{},"confidence":0.7}"#;
        let cmd = post_process(raw, "x").unwrap();
        assert_eq!(cmd.intent, Intent::Unknown);
    }

    #[test]
    fn lowercase_intent_normalized() {
        let raw = r#"{"intent":"check balance","normalized":"x","entities":{},"confidence":0.8}"#;
        let cmd = post_process(raw, "x").unwrap();
        assert_eq!(cmd.intent, Intent::CheckBalance);
    }

    #[test]
    fn devanagari_entity_fields_transliterated() {
        let raw = r#"{"intent":"CHECK_BALANCE","normalized":"balance","entities":{"customer":"भरत"},"confidence":0.9}"#;
        let cmd = post_process(raw, "bharat ka balance").unwrap();
        assert_eq!(cmd.entities["customer"], "bharat");
    }

    #[test]
    fn pronoun_sets_customer_ref() {
        let raw = r#"{"intent":"ADD_CREDIT","normalized":"usko 300 add karo","entities":{"amount":300},"confidence":0.94}"#;
        let cmd = post_process(raw, "usko 300 add karo").unwrap();
        assert_eq!(cmd.entities["customerRef"], "active");
        let IntentPayload::AddCredit { customer, .. } = cmd.payload else {
            panic!("wrong payload");
        };
        assert_eq!(customer, CustomerRef::Active);
    }

    #[test]
    fn garbage_returns_none() {
        assert!(post_process("no json here", "x").is_none());
        assert!(post_process("{broken", "x").is_none());
    }

    #[test]
    fn confidence_clamped_to_unit_interval() {
        let raw = r#"{"intent":"CHECK_BALANCE","normalized":"x","entities":{},"confidence":1.7}"#;
        let cmd = post_process(raw, "x").unwrap();
        assert_eq!(cmd.confidence, 1.0);
    }
}
