//! Extractor prompt contract

use dukaan_voice_core::Intent;
use dukaan_voice_llm::ChatMessage;

/// Fixed system prompt enumerating the intent vocabulary and the strict
/// JSON output contract. The post-processor is the safety net for every
/// rule the model bends.
pub fn system_prompt() -> String {
    let vocabulary = Intent::vocabulary().join(", ");
    format!(
        "You are the command parser for a small-shop back-office voice assistant. \
Shop operators speak Hindi, English, or Hinglish.\n\
Return STRICT JSON only, no prose, with exactly these fields:\n\
{{\"normalized\": string, \"intent\": string, \"entities\": object, \"confidence\": number}}\n\
\n\
Rules:\n\
- intent MUST be one of: {vocabulary}\n\
- confidence is your certainty in [0,1]\n\
- normalized is the cleaned transcript in Roman script\n\
- write names, products and all entity text in Roman (Latin) script, never Devanagari\n\
- entities.customer: the customer name if spoken; entities.customerRef: \"active\" \
when the operator says uska/isko/same customer/pichla customer\n\
- CREATE_INVOICE entities: customer, items (array of {{product, quantity, unit}}), \
autoSend (true only for explicit 'bhej do'/'send karo'), gst\n\
- item lists mean CREATE_INVOICE; 'likh do'/'note karo'/'udhaar do' with a plain \
amount means ADD_CREDIT\n\
- RECORD_PAYMENT entities: amount, paymentMode (cash/upi/card/other)\n\
- CREATE_REMINDER entities: amount, when (the spoken time phrase verbatim), message\n\
- phone numbers may be spoken digit by digit; copy the spoken words into \
entities.phone verbatim\n\
- amounts may use hazar/lakh words; copy them verbatim into entities.amount\n\
- SWITCH_LANGUAGE entities: language\n\
- DELETE_CUSTOMER_DATA entities: customer, otp (if the operator read one out)\n\
- if the utterance is not a command, use UNKNOWN with low confidence"
    )
}

/// Assemble the messages for one extraction call.
pub fn build_messages(context: &str, utterance: &str) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt())];
    if !context.is_empty() {
        messages.push(ChatMessage::system(format!(
            "Conversation so far:\n{context}"
        )));
    }
    messages.push(ChatMessage::user(utterance.to_string()));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_enumerates_vocabulary() {
        let prompt = system_prompt();
        for name in Intent::vocabulary() {
            assert!(prompt.contains(name), "missing {name}");
        }
    }

    #[test]
    fn context_is_optional() {
        assert_eq!(build_messages("", "Rahul ka balance").len(), 2);
        assert_eq!(build_messages("turns...", "Rahul ka balance").len(), 3);
    }
}
