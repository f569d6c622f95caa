//! Confidence and confirmation gate
//!
//! Per-session state machine: IDLE → AWAITING_CONFIRMATION → IDLE. Decides
//! whether a freshly extracted intent executes immediately, needs a spoken
//! yes/no, or asks the operator to repeat. Yes/no interpretation is local
//! token matching — never delegated to the LLM.

use dukaan_voice_core::{format_inr, Intent, IntentPayload, Language};
use dukaan_voice_nlu::ExtractedCommand;
use rust_decimal::Decimal;

/// Below this, the gate refuses to act and asks the operator to repeat.
pub const MIN_CONFIDENCE: f32 = 0.65;

/// Between `MIN_CONFIDENCE` and this, the gate asks for confirmation.
pub const AUTO_EXECUTE_CONFIDENCE: f32 = 0.85;

/// Amounts above this always confirm, whatever the confidence.
pub const LARGE_AMOUNT: i64 = 5000;

/// An intent paused for a yes/no.
#[derive(Debug, Clone)]
pub struct PendingIntent {
    pub command: ExtractedCommand,
}

/// What the gate wants done with a fresh command.
#[derive(Debug)]
pub enum GateDecision {
    /// Execute immediately.
    Execute(ExtractedCommand),
    /// Stored as pending; ask the operator the given question.
    Confirm { prompt: String },
    /// Confidence too low; ask the operator to repeat.
    Repeat { prompt: String },
    /// SWITCH_LANGUAGE short-circuits the pipeline entirely.
    SwitchLanguage { language: Language, ack: String },
}

/// Outcome of interpreting a transcript while AWAITING_CONFIRMATION.
#[derive(Debug)]
pub enum ConfirmOutcome {
    /// Operator said yes: execute the released command.
    Proceed(ExtractedCommand),
    /// Operator said no: reply "okay, cancelled".
    Cancelled { reply: String },
    /// Neither: keep waiting, ask for a clear yes or no.
    Unclear { reply: String },
}

/// The state machine. At most one pending intent per session; cleared on
/// yes, no, or session close.
#[derive(Default)]
pub struct ConfirmationGate {
    pending: Option<PendingIntent>,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_awaiting(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop any pending intent (session close).
    pub fn clear(&mut self) {
        self.pending = None;
    }

    /// Intent and confidence of the stored pending intent, for the
    /// `voice:confirm_needed` event.
    pub fn pending_summary(&self) -> Option<(Intent, f32)> {
        self.pending
            .as_ref()
            .map(|p| (p.command.intent, p.command.confidence))
    }

    /// Gate a freshly extracted command.
    pub fn decide(&mut self, command: ExtractedCommand, language: Language) -> GateDecision {
        // language switches execute immediately, before any other check
        if command.intent == Intent::SwitchLanguage {
            let target = match &command.payload {
                IntentPayload::SwitchLanguage { language: Some(code) } => {
                    Language::from_code(code).unwrap_or(language)
                }
                _ => language,
            };
            return GateDecision::SwitchLanguage {
                language: target,
                ack: language_ack(target),
            };
        }

        if command.confidence < MIN_CONFIDENCE {
            return GateDecision::Repeat {
                prompt: repeat_prompt(language),
            };
        }

        let large_amount = command
            .payload
            .amount()
            .is_some_and(|a| a > Decimal::from(LARGE_AMOUNT));
        let needs_confirmation = command.intent.is_risky()
            || large_amount
            || command.confidence < AUTO_EXECUTE_CONFIDENCE;

        if needs_confirmation {
            let prompt = confirmation_prompt(&command, language);
            self.pending = Some(PendingIntent { command });
            GateDecision::Confirm { prompt }
        } else {
            GateDecision::Execute(command)
        }
    }

    /// Interpret a transcript as yes/no while awaiting confirmation.
    /// Returns `None` when the gate is idle (the caller runs extraction).
    pub fn interpret(&mut self, transcript: &str, language: Language) -> Option<ConfirmOutcome> {
        self.pending.as_ref()?;

        match classify_yes_no(transcript) {
            Some(true) => {
                let pending = self.pending.take().expect("checked above");
                Some(ConfirmOutcome::Proceed(pending.command))
            }
            Some(false) => {
                self.pending = None;
                Some(ConfirmOutcome::Cancelled {
                    reply: cancelled_reply(language),
                })
            }
            None => Some(ConfirmOutcome::Unclear {
                reply: unclear_reply(language),
            }),
        }
    }
}

/// Local yes/no token matching over per-language word sets and phrases.
fn classify_yes_no(transcript: &str) -> Option<bool> {
    let text = transcript.trim().to_lowercase();

    const NO_PHRASES: &[&str] = &["mat karo", "band karo", "ruk jao", "rehne do", "not now"];
    const YES_PHRASES: &[&str] = &["kar do", "go ahead"];

    if NO_PHRASES.iter().any(|p| text.contains(p)) {
        return Some(false);
    }

    const YES_WORDS: &[&str] = &[
        "haan", "ha", "han", "yes", "yeah", "bilkul", "ok", "okay", "theek", "sahi", "confirm",
        "aama", "avunu", "ho", "sari", "seri",
    ];
    const NO_WORDS: &[&str] = &[
        "nahi", "nahin", "na", "no", "nope", "cancel", "mat", "illai", "illa", "beda", "venda",
        "nako", "nai",
    ];

    // negation words win over yes words ("cancel kar do" is a no)
    for token in text.split(|c: char| !c.is_alphanumeric()) {
        if NO_WORDS.contains(&token) {
            return Some(false);
        }
    }
    for token in text.split(|c: char| !c.is_alphanumeric()) {
        if YES_WORDS.contains(&token) {
            return Some(true);
        }
    }

    if YES_PHRASES.iter().any(|p| text.contains(p)) {
        return Some(true);
    }
    None
}

/// Confirmation question. Entity content (names, amounts) stays Latin; only
/// the yes/no suffix is translated.
fn confirmation_prompt(command: &ExtractedCommand, language: Language) -> String {
    let action = describe_action(command);
    format!("{action} — {}", yes_no_suffix(language))
}

fn describe_action(command: &ExtractedCommand) -> String {
    let name = command
        .payload
        .customer_ref()
        .and_then(|c| c.name())
        .unwrap_or("customer");

    match &command.payload {
        IntentPayload::AddCredit { amount, .. } => match amount {
            Some(amount) => format!("{name} ko {} credit add karna hai", format_inr(*amount)),
            None => format!("{name} ko credit add karna hai"),
        },
        IntentPayload::RecordPayment { amount, .. } => match amount {
            Some(amount) => format!("{name} ka {} payment record karna hai", format_inr(*amount)),
            None => format!("{name} ka payment record karna hai"),
        },
        IntentPayload::CancelInvoice { cancel_all, .. } => {
            if *cancel_all {
                format!("{name} ke saare bills cancel karne hain")
            } else {
                format!("{name} ka bill cancel karna hai")
            }
        }
        IntentPayload::CancelReminder { .. } => format!("{name} ka reminder cancel karna hai"),
        IntentPayload::DeleteCustomerData { .. } => {
            format!("{name} ka poora data delete karna hai")
        }
        IntentPayload::CreateReminder { amount, .. } => match amount {
            Some(amount) => format!("{name} ko {} ka reminder lagana hai", format_inr(*amount)),
            None => format!("{name} ko reminder lagana hai"),
        },
        IntentPayload::CreateInvoice { items, .. } => {
            format!("{name} ka {} item ka bill banana hai", items.len())
        }
        _ => format!("{} karna hai", command.intent.as_str().to_lowercase().replace('_', " ")),
    }
}

fn yes_no_suffix(language: Language) -> &'static str {
    match language {
        Language::Hindi => "Haan ya nahi?",
        Language::English => "Yes or no?",
        Language::Tamil => "Aama illai?",
        Language::Telugu => "Avunu kaada?",
        Language::Marathi => "Ho ki nahi?",
        Language::Bengali => "Hyan na na?",
        Language::Gujarati => "Ha ke na?",
        Language::Kannada => "Houdu illava?",
        Language::Malayalam => "Athe alle?",
        Language::Punjabi => "Haanji ya nahi?",
    }
}

fn repeat_prompt(language: Language) -> String {
    match language {
        Language::Hindi => "Maaf kijiye, samajh nahi aaya. Phir se boliye.",
        Language::English => "Sorry, I didn't catch that. Please repeat.",
        Language::Tamil => "Mannikkavum, puriyalai. Thirumba sollunga.",
        Language::Telugu => "Kshaminchandi, artham kaledu. Malli cheppandi.",
        Language::Marathi => "Maaf kara, samajle nahi. Punha sanga.",
        Language::Bengali => "Dukkhito, bujhte parini. Abar bolun.",
        Language::Gujarati => "Maaf karo, samjayu nahi. Farithi bolo.",
        Language::Kannada => "Kshamisi, artha agalilla. Matte heli.",
        Language::Malayalam => "Kshamikkanam, manassilayilla. Veendum parayu.",
        Language::Punjabi => "Maaf karna, samajh nahi aayi. Dubara bolo.",
    }
    .to_string()
}

fn cancelled_reply(language: Language) -> String {
    match language {
        Language::Hindi => "Theek hai, cancel kar diya.",
        Language::English => "Okay, cancelled.",
        Language::Tamil => "Sari, cancel pannitten.",
        Language::Telugu => "Sare, cancel chesanu.",
        Language::Marathi => "Theek aahe, cancel kele.",
        Language::Bengali => "Thik ache, cancel kore dilam.",
        Language::Gujarati => "Saru, cancel kari didhu.",
        Language::Kannada => "Sari, cancel maadide.",
        Language::Malayalam => "Sheri, cancel cheythu.",
        Language::Punjabi => "Theek hai, cancel kar ditta.",
    }
    .to_string()
}

fn unclear_reply(language: Language) -> String {
    match language {
        Language::Hindi => "Kripya haan ya nahi boliye.",
        Language::English => "Please say yes or no.",
        Language::Tamil => "Aama illai nu sollunga.",
        Language::Telugu => "Avunu leda kaadu cheppandi.",
        Language::Marathi => "Krupaya ho kinva nahi sanga.",
        Language::Bengali => "Doya kore hyan ba na bolun.",
        Language::Gujarati => "Krupa kari ha ke na kaho.",
        Language::Kannada => "Dayavittu houdu athava illa heli.",
        Language::Malayalam => "Dayavayi athe allengil alla parayu.",
        Language::Punjabi => "Kirpa karke haanji ya nahi bolo.",
    }
    .to_string()
}

fn language_ack(language: Language) -> String {
    match language {
        Language::Hindi => "Theek hai, ab Hindi mein baat karte hain.",
        Language::English => "Okay, switching to English.",
        Language::Tamil => "Sari, ini Tamil-la pesalam.",
        Language::Telugu => "Sare, ika Telugu-lo matladudam.",
        Language::Marathi => "Theek aahe, aata Marathi madhe bolu.",
        Language::Bengali => "Thik ache, ekhon Bangla-y kotha bolbo.",
        Language::Gujarati => "Saru, have Gujarati-ma vaat karishu.",
        Language::Kannada => "Sari, innu Kannada-dalli matanaduttene.",
        Language::Malayalam => "Sheri, ini Malayalam-il samsarikkam.",
        Language::Punjabi => "Theek hai, hun Punjabi vich gall karange.",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dukaan_voice_core::CustomerRef;
    use serde_json::json;

    fn command(intent: Intent, confidence: f32, entities: serde_json::Value) -> ExtractedCommand {
        let payload = dukaan_voice_nlu::build_payload(intent, &entities, "");
        ExtractedCommand {
            normalized: "test".to_string(),
            intent,
            confidence,
            entities,
            payload,
        }
    }

    #[test]
    fn low_confidence_asks_repeat() {
        let mut gate = ConfirmationGate::new();
        let decision = gate.decide(
            command(Intent::AddCredit, 0.5, json!({"customer": "Rahul", "amount": 100})),
            Language::Hindi,
        );
        assert!(matches!(decision, GateDecision::Repeat { .. }));
        assert!(!gate.is_awaiting());
    }

    #[test]
    fn high_confidence_small_amount_executes() {
        let mut gate = ConfirmationGate::new();
        let decision = gate.decide(
            command(Intent::AddCredit, 0.94, json!({"customer": "Bharat", "amount": 300})),
            Language::Hindi,
        );
        assert!(matches!(decision, GateDecision::Execute(_)));
    }

    #[test]
    fn large_amount_needs_confirmation() {
        let mut gate = ConfirmationGate::new();
        let decision = gate.decide(
            command(Intent::AddCredit, 0.95, json!({"customer": "Rahul", "amount": 12000})),
            Language::Hindi,
        );
        match decision {
            GateDecision::Confirm { prompt } => {
                assert!(prompt.contains("Rahul"));
                assert!(prompt.contains("₹12000"));
                assert!(prompt.contains("Haan ya nahi?"));
            }
            other => panic!("expected confirmation, got {other:?}"),
        }
        assert!(gate.is_awaiting());
    }

    #[test]
    fn risky_intents_always_confirm() {
        let mut gate = ConfirmationGate::new();
        let decision = gate.decide(
            command(Intent::CancelInvoice, 0.99, json!({"customer": "Mohan"})),
            Language::Hindi,
        );
        assert!(matches!(decision, GateDecision::Confirm { .. }));
    }

    #[test]
    fn mid_confidence_confirms() {
        let mut gate = ConfirmationGate::new();
        let decision = gate.decide(
            command(Intent::CheckBalance, 0.7, json!({"customer": "Rahul"})),
            Language::Hindi,
        );
        assert!(matches!(decision, GateDecision::Confirm { .. }));
    }

    #[test]
    fn yes_releases_pending() {
        let mut gate = ConfirmationGate::new();
        gate.decide(
            command(Intent::AddCredit, 0.95, json!({"customer": "Rahul", "amount": 12000})),
            Language::Hindi,
        );

        let outcome = gate.interpret("haan", Language::Hindi).unwrap();
        match outcome {
            ConfirmOutcome::Proceed(released) => {
                assert_eq!(released.intent, Intent::AddCredit);
                let IntentPayload::AddCredit { customer, .. } = released.payload else {
                    panic!("wrong payload");
                };
                assert_eq!(customer, CustomerRef::Named("Rahul".to_string()));
            }
            other => panic!("expected proceed, got {other:?}"),
        }
        assert!(!gate.is_awaiting());
    }

    #[test]
    fn no_cancels_pending() {
        let mut gate = ConfirmationGate::new();
        gate.decide(
            command(Intent::AddCredit, 0.95, json!({"customer": "Rahul", "amount": 12000})),
            Language::Hindi,
        );
        let outcome = gate.interpret("nahi", Language::Hindi).unwrap();
        assert!(matches!(outcome, ConfirmOutcome::Cancelled { .. }));
        assert!(!gate.is_awaiting());
    }

    #[test]
    fn unclear_keeps_waiting() {
        let mut gate = ConfirmationGate::new();
        gate.decide(
            command(Intent::AddCredit, 0.95, json!({"customer": "Rahul", "amount": 12000})),
            Language::Hindi,
        );
        let outcome = gate.interpret("woh wala doosra", Language::Hindi).unwrap();
        assert!(matches!(outcome, ConfirmOutcome::Unclear { .. }));
        assert!(gate.is_awaiting());
    }

    #[test]
    fn idle_gate_interprets_nothing() {
        let mut gate = ConfirmationGate::new();
        assert!(gate.interpret("haan", Language::Hindi).is_none());
    }

    #[test]
    fn phrase_negations_beat_word_matches() {
        // "mat karo" contains no bare yes word but must read as a no
        assert_eq!(classify_yes_no("mat karo"), Some(false));
        assert_eq!(classify_yes_no("band karo bhai"), Some(false));
        assert_eq!(classify_yes_no("haan bilkul"), Some(true));
        assert_eq!(classify_yes_no("kuch aur"), None);
    }

    #[test]
    fn language_switch_short_circuits() {
        let mut gate = ConfirmationGate::new();
        let decision = gate.decide(
            command(Intent::SwitchLanguage, 0.9, json!({"language": "tamil"})),
            Language::Hindi,
        );
        match decision {
            GateDecision::SwitchLanguage { language, .. } => {
                assert_eq!(language, Language::Tamil);
            }
            other => panic!("expected switch, got {other:?}"),
        }
    }
}
