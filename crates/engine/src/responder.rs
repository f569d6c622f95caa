//! Response generation
//!
//! Fast path: deterministic templates for intents with stable result shapes
//! (milliseconds, no LLM). Slow path: a brevity-enforced chat-completion
//! call that streams tokens to the session manager so TTS playback can
//! start before the full sentence exists. Monetary amounts carry the rupee
//! symbol; names and numbers stay Latin whatever the output language.

use std::sync::Arc;
use std::time::Duration;

use dukaan_voice_core::{ExecutionResult, Intent, Language};
use dukaan_voice_llm::{ChatBackend, ChatMessage};
use dukaan_voice_store::{context_hash, llm_cache_key, CachePolicy, CacheScope, TieredCache};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

/// Returned when the LLM times out or fails; never cached.
pub const FALLBACK_REPLY: &str = "Theek hai.";

/// Intents whose execution messages are already complete utterances: the
/// template path returns them as-is.
const FAST_PATH: &[Intent] = &[
    Intent::CheckBalance,
    Intent::RecordPayment,
    Intent::AddCredit,
    Intent::CheckStock,
    Intent::ListCustomerBalances,
    Intent::TotalPendingAmount,
    Intent::ListReminders,
    Intent::ShowPendingInvoice,
    Intent::CreateInvoice,
    Intent::ConfirmInvoice,
    Intent::CreateReminder,
    Intent::CancelReminder,
    Intent::ModifyReminder,
    Intent::GetCustomerInfo,
];

/// Response generator.
pub struct ResponseGenerator {
    llm: Option<Arc<dyn ChatBackend>>,
    cache: Arc<TieredCache>,
    timeout: Duration,
}

impl ResponseGenerator {
    pub fn new(llm: Option<Arc<dyn ChatBackend>>, cache: Arc<TieredCache>) -> Self {
        Self {
            llm,
            cache,
            timeout: Duration::from_secs(6),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Produce the spoken reply for an execution result. Chunks stream to
    /// `chunk_tx` when the slow path runs; the fast path sends one chunk.
    pub async fn generate(
        &self,
        intent: Intent,
        result: &ExecutionResult,
        language: Language,
        context: &str,
        chunk_tx: Option<mpsc::Sender<String>>,
    ) -> String {
        if let Some(text) = self.fast_path(intent, result) {
            if let Some(tx) = &chunk_tx {
                let _ = tx.send(text.clone()).await;
            }
            return text;
        }

        // cached LLM phrasings skip the call entirely
        let policy = CachePolicy::for_intent(intent);
        let cache_key = policy.map(|p| {
            let digest = result_digest(result);
            let context_part = match p.scope {
                CacheScope::Conversation => Some(context_hash(context)),
                CacheScope::Global => None,
            };
            llm_cache_key(intent, &digest, &result.message, context_part.as_deref())
        });

        if let Some(key) = &cache_key {
            if let Some(cached) = self.cache.get(key).await {
                if let Some(tx) = &chunk_tx {
                    let _ = tx.send(cached.clone()).await;
                }
                return cached;
            }
        }

        let Some(llm) = &self.llm else {
            if let Some(tx) = &chunk_tx {
                let _ = tx.send(result.message.clone()).await;
            }
            return result.message.clone();
        };

        let messages = build_messages(result, language, context);
        let completion = match &chunk_tx {
            Some(tx) => {
                tokio::time::timeout(self.timeout, llm.complete_stream(&messages, tx.clone())).await
            }
            None => tokio::time::timeout(self.timeout, llm.complete(&messages)).await,
        };

        let text = match completion {
            Ok(Ok(completion)) if !completion.text.trim().is_empty() => {
                completion.text.trim().to_string()
            }
            Ok(Ok(_)) => FALLBACK_REPLY.to_string(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Response generation failed, using fallback");
                FALLBACK_REPLY.to_string()
            }
            Err(_) => {
                tracing::warn!("Response generation timed out, using fallback");
                FALLBACK_REPLY.to_string()
            }
        };

        // fallback strings are never cached
        if text != FALLBACK_REPLY {
            if let (Some(key), Some(policy)) = (&cache_key, policy) {
                self.cache.put_with_ttl(key, &text, policy.ttl).await;
            }
        } else if let Some(tx) = &chunk_tx {
            // the stream produced nothing the client could play
            let _ = tx.send(text.clone()).await;
        }

        text
    }

    /// Template path: the engine's execution message for stable intents is
    /// already the right utterance (names and amounts Latin, ₹ applied).
    fn fast_path(&self, intent: Intent, result: &ExecutionResult) -> Option<String> {
        if !result.success {
            // short failures read fine as-is; longer explanations go
            // through the LLM for phrasing
            return (result.message.len() <= 160).then(|| result.message.clone());
        }
        FAST_PATH.contains(&intent).then(|| result.message.clone())
    }
}

fn result_digest(result: &ExecutionResult) -> String {
    let mut hasher = Sha256::new();
    hasher.update(result.message.as_bytes());
    if let Some(data) = &result.data {
        hasher.update(data.to_string().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn build_messages(result: &ExecutionResult, language: Language, context: &str) -> Vec<ChatMessage> {
    let system = format!(
        "You voice a small-shop back-office assistant. Reply in {} (Roman script), \
maximum 1 sentence — 2 only if you must ask a follow-up question. No filler endings. \
Keep customer names, numbers and amounts exactly as given, in Latin script, with the ₹ symbol \
for money.",
        language.display_name()
    );
    let mut messages = vec![ChatMessage::system(system)];
    if !context.is_empty() {
        messages.push(ChatMessage::system(format!("Conversation:\n{context}")));
    }
    messages.push(ChatMessage::user(format!(
        "Say this to the shop operator: {}",
        result.message
    )));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dukaan_voice_llm::{Completion, FinishReason, LlmError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLlm {
        calls: AtomicUsize,
        reply: String,
    }

    #[async_trait]
    impl ChatBackend for CountingLlm {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<Completion, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Completion {
                text: self.reply.clone(),
                finish_reason: FinishReason::Stop,
                total_time_ms: 1,
            })
        }

        async fn complete_stream(
            &self,
            messages: &[ChatMessage],
            tx: mpsc::Sender<String>,
        ) -> Result<Completion, LlmError> {
            let completion = self.complete(messages).await?;
            let _ = tx.send(completion.text.clone()).await;
            Ok(completion)
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    fn cache() -> Arc<TieredCache> {
        Arc::new(TieredCache::local_only(32, Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn fast_path_skips_llm() {
        let llm = Arc::new(CountingLlm {
            calls: AtomicUsize::new(0),
            reply: "never".to_string(),
        });
        let generator = ResponseGenerator::new(Some(llm.clone()), cache());

        let result = ExecutionResult::ok("Bharat ka balance ₹500 hai.");
        let text = generator
            .generate(Intent::CheckBalance, &result, Language::Hindi, "", None)
            .await;

        assert_eq!(text, "Bharat ka balance ₹500 hai.");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_path_streams_chunks() {
        let llm = Arc::new(CountingLlm {
            calls: AtomicUsize::new(0),
            reply: "Aaj ka summary taiyar hai.".to_string(),
        });
        let generator = ResponseGenerator::new(Some(llm), cache());

        let (tx, mut rx) = mpsc::channel(8);
        let result = ExecutionResult::ok_with(
            "summary data",
            serde_json::json!({"totalSales": 100}),
        );
        let text = generator
            .generate(Intent::DailySummary, &result, Language::Hindi, "", Some(tx))
            .await;

        assert_eq!(text, "Aaj ka summary taiyar hai.");
        assert_eq!(rx.recv().await.unwrap(), "Aaj ka summary taiyar hai.");
    }

    #[tokio::test]
    async fn cached_phrasing_reused() {
        let llm = Arc::new(CountingLlm {
            calls: AtomicUsize::new(0),
            reply: "Ek hi baar bolunga.".to_string(),
        });
        let generator = ResponseGenerator::new(Some(llm.clone()), cache());

        let result = ExecutionResult::ok("summary");
        for _ in 0..3 {
            generator
                .generate(Intent::DailySummary, &result, Language::Hindi, "ctx", None)
                .await;
        }
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_llm_falls_back_to_message() {
        let generator = ResponseGenerator::new(None, cache());
        let result = ExecutionResult::ok("seedha message");
        let text = generator
            .generate(Intent::DailySummary, &result, Language::Hindi, "", None)
            .await;
        assert_eq!(text, "seedha message");
    }
}
