//! The per-utterance command pipeline
//!
//! One final transcript flows: transcript(final) → thinking → extraction →
//! confirmation gate → business engine → response generation → TTS. The
//! session's pipeline lock is held for the whole utterance, so intent i
//! cannot overtake intent i-1 and conversation memory stays coherent.

use std::sync::Arc;

use dukaan_voice_core::Intent;
use dukaan_voice_engine::{ConfirmOutcome, GateDecision};
use dukaan_voice_speech::buffer_to_base64;
use tokio::sync::mpsc;

use crate::protocol::ServerEvent;
use crate::session::{Session, TtsChoice};
use crate::state::AppState;

/// Drive one final transcript through the whole pipeline.
pub async fn process_final_transcript(state: &AppState, session: &Arc<Session>, text: String) {
    let text = text.trim().to_string();
    if text.is_empty() {
        return;
    }
    session.touch();

    // ordering guarantee (i): the final transcript leads
    session
        .send(
            ServerEvent::Transcript {
                text: text.clone(),
                is_final: true,
            }
            .envelope(),
        )
        .await;

    // the pipeline lock serializes intents within the session
    let mut pipeline = session.pipeline.lock().await;
    let language = pipeline.ctx.language;

    // a pending yes/no is interpreted locally, before any LLM work
    if let Some(outcome) = pipeline.gate.interpret(&text, language) {
        match outcome {
            ConfirmOutcome::Proceed(command) => {
                pipeline.ctx.memory.add_user_message(&text, Some(command.intent));
                execute_and_respond(state, session, &mut pipeline, command).await;
            }
            ConfirmOutcome::Cancelled { reply } | ConfirmOutcome::Unclear { reply } => {
                pipeline.ctx.memory.add_user_message(&text, None);
                pipeline.ctx.memory.add_assistant_message(&reply);
                session
                    .send(
                        ServerEvent::Response {
                            text: reply.clone(),
                            execution_result: None,
                        }
                        .envelope(),
                    )
                    .await;
                speak(state, session, &reply).await;
            }
        }
        return;
    }

    // ordering guarantee (iii): thinking goes out before any LLM call
    session
        .send(
            ServerEvent::Thinking {
                transcript: text.clone(),
            }
            .envelope(),
        )
        .await;

    let context = pipeline.ctx.memory.formatted_context(10);
    let command = state.extractor.extract(&text, &context).await;

    session
        .send(
            ServerEvent::Intent {
                intent: command.intent.as_str().to_string(),
                normalized: command.normalized.clone(),
                confidence: command.confidence,
                entities: command.entities.clone(),
            }
            .envelope(),
        )
        .await;

    pipeline
        .ctx
        .memory
        .add_user_message(&command.normalized, Some(command.intent));

    match pipeline.gate.decide(command, language) {
        GateDecision::Execute(command) => {
            execute_and_respond(state, session, &mut pipeline, command).await;
        }
        GateDecision::Confirm { prompt } => {
            let (intent, confidence) = pipeline
                .gate
                .pending_summary()
                .unwrap_or((Intent::Unknown, 0.0));
            pipeline.ctx.memory.add_assistant_message(&prompt);
            session
                .send(
                    ServerEvent::ConfirmNeeded {
                        text: prompt.clone(),
                        intent: intent.as_str().to_string(),
                        confidence,
                    }
                    .envelope(),
                )
                .await;
            speak(state, session, &prompt).await;
        }
        GateDecision::Repeat { prompt } => {
            pipeline.ctx.memory.add_assistant_message(&prompt);
            session
                .send(
                    ServerEvent::Response {
                        text: prompt.clone(),
                        execution_result: None,
                    }
                    .envelope(),
                )
                .await;
            speak(state, session, &prompt).await;
        }
        GateDecision::SwitchLanguage { language, ack } => {
            pipeline.ctx.language = language;
            *session.language.write() = language;
            pipeline.ctx.memory.add_assistant_message(&ack);
            session
                .send(
                    ServerEvent::LanguageChanged {
                        language,
                        text: ack.clone(),
                    }
                    .envelope(),
                )
                .await;
            session
                .send(
                    ServerEvent::Response {
                        text: ack.clone(),
                        execution_result: None,
                    }
                    .envelope(),
                )
                .await;
            speak(state, session, &ack).await;
        }
    }
}

async fn execute_and_respond(
    state: &AppState,
    session: &Arc<Session>,
    pipeline: &mut crate::session::PipelineState,
    command: dukaan_voice_nlu::ExtractedCommand,
) {
    let result = state.engine.execute(&command, &mut pipeline.ctx).await;

    // recording intents flip session state and emit their own events
    if result.success {
        match command.intent {
            Intent::StartRecording => {
                *session.recording.write() = true;
                session.send(ServerEvent::RecordingStarted.envelope()).await;
            }
            Intent::StopRecording => {
                *session.recording.write() = false;
                session.send(ServerEvent::RecordingStopped.envelope()).await;
            }
            _ => {}
        }
    }

    let language = pipeline.ctx.language;
    let context = pipeline.ctx.memory.formatted_context(6);

    // ordering guarantee (ii): chunks precede the final response
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(16);
    let generate = state
        .responder
        .generate(command.intent, &result, language, &context, Some(chunk_tx));
    let forward = async {
        while let Some(chunk) = chunk_rx.recv().await {
            session
                .send(ServerEvent::ResponseChunk { text: chunk }.envelope())
                .await;
        }
    };
    let (text, ()) = tokio::join!(generate, forward);

    pipeline.ctx.memory.add_assistant_message(&text);
    session
        .send(
            ServerEvent::Response {
                text: text.clone(),
                execution_result: Some(result),
            }
            .envelope(),
        )
        .await;

    speak(state, session, &text).await;
}

/// Synthesize and stream the reply. Browser-TTS clients and TTS failures
/// both degrade to text-only — the response is already delivered.
async fn speak(state: &AppState, session: &Arc<Session>, text: &str) {
    if *session.tts_choice.read() == TtsChoice::Browser {
        return;
    }
    let Some(tts) = &state.tts else {
        return;
    };

    let language = session.language.read().code();
    let synthesis = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        tts.synthesize(text, language),
    )
    .await;

    match synthesis {
        Ok(Ok(audio)) => {
            session
                .send(
                    ServerEvent::TtsStream {
                        audio_base64: buffer_to_base64(&audio.bytes),
                        format: audio.format.to_string(),
                        provider: tts.id().to_string(),
                    }
                    .envelope(),
                )
                .await;
        }
        Ok(Err(e)) => {
            tracing::warn!(session_id = %session.id, error = %e, "TTS failed, text-only reply");
        }
        Err(_) => {
            tracing::warn!(session_id = %session.id, "TTS timed out, text-only reply");
        }
    }
}
