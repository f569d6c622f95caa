//! WebSocket handler
//!
//! One connection = one session. The writer task is the sole owner of the
//! sink (ordered delivery); the reader loop dispatches control frames and
//! feeds binary audio to the live STT stream; one producer task per STT
//! stream pushes transcript events back into the pipeline.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use dukaan_voice_core::SessionRecord;
use dukaan_voice_speech::{LiveTranscription, SttEvent};

use crate::pipeline::process_final_transcript;
use crate::protocol::{ClientFrame, ClientMessage, Envelope, ServerEvent};
use crate::session::{Session, TtsChoice};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Channel-level admin policy hook: the trusted edge in front of this
    /// server strips or injects `role=admin` before the frame reaches us.
    #[serde(default)]
    pub role: Option<String>,
}

/// Handle the WebSocket upgrade at `/ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    let is_admin = params.role.as_deref() == Some("admin");
    ws.on_upgrade(move |socket| handle_socket(socket, state, is_admin))
}

async fn handle_socket(socket: WebSocket, state: AppState, is_admin: bool) {
    let (mut sink, mut stream) = socket.split();

    // outbound channel: the writer task is the only writer to the client
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(64);

    let session = match state.sessions.create(outbound_tx, is_admin) {
        Ok(session) => session,
        Err(e) => {
            let envelope = ServerEvent::Error {
                error: e.to_string(),
            }
            .envelope();
            let _ = sink.send(Message::Text(envelope.to_json())).await;
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: axum::extract::ws::close_code::AGAIN,
                    reason: "server at capacity".into(),
                })))
                .await;
            return;
        }
    };

    let writer_task = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            if sink.send(Message::Text(envelope.to_json())).await.is_err() {
                break;
            }
        }
        // clean close once the session is done with us
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: axum::extract::ws::close_code::NORMAL,
                reason: "session ended".into(),
            })))
            .await;
    });

    // persist session metadata; the session works even if this fails
    let session_language = session.language.read().code().to_string();
    if let Err(e) = state
        .data
        .sessions
        .create(SessionRecord {
            id: session.id.clone(),
            started_at: chrono::Utc::now(),
            ended_at: None,
            status: dukaan_voice_core::SessionStatus::Active,
            language: session_language,
            metadata: serde_json::json!({}),
        })
        .await
    {
        tracing::warn!(session_id = %session.id, error = %e, "Session metadata persist failed");
    }

    // announce capabilities
    session
        .send(
            ServerEvent::Start {
                session_id: session.id.clone(),
                stt_available: state.stt.is_some(),
                tts_available: state.tts.is_some(),
                stt_provider: state.stt.as_ref().map(|s| s.id().to_string()),
                tts_provider: state.tts.as_ref().map(|t| t.id().to_string()),
            }
            .envelope(),
        )
        .await;

    // live STT stream state for this connection
    let mut stt_handle: Option<Box<dyn LiveTranscription>> = None;
    let mut stt_task: Option<tokio::task::JoinHandle<()>> = None;

    loop {
        tokio::select! {
            biased;

            _ = session.close_signal.notified() => {
                tracing::debug!(session_id = %session.id, "Session closed server-side");
                break;
            }

            incoming = stream.next() => {
                let Some(incoming) = incoming else { break };
                match incoming {
                    Ok(Message::Text(text)) => {
                        session.touch();
                        let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else {
                            // protocol-level failure: the one case that
                            // produces an `error` frame
                            session
                                .send(ServerEvent::Error { error: "invalid JSON frame".to_string() }.envelope())
                                .await;
                            continue;
                        };
                        let Some(message) = ClientMessage::parse(&frame) else {
                            session
                                .send(ServerEvent::Error { error: format!("unknown frame type: {}", frame.kind) }.envelope())
                                .await;
                            continue;
                        };
                        handle_control(
                            &state,
                            &session,
                            message,
                            &mut stt_handle,
                            &mut stt_task,
                        )
                        .await;
                    }
                    Ok(Message::Binary(frame)) => {
                        session.touch();
                        if stt_handle.is_none() {
                            start_live_stt(&state, &session, &mut stt_handle, &mut stt_task).await;
                        }
                        let mut stream_dead = false;
                        if let Some(handle) = stt_handle.as_mut() {
                            if let Err(e) = handle.send(frame).await {
                                tracing::debug!(session_id = %session.id, error = %e, "STT frame dropped");
                                stream_dead = true;
                            }
                        }
                        if stream_dead {
                            stt_handle = None;
                        }
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                        session.touch();
                    }
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        tracing::debug!(session_id = %session.id, error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }

    // teardown: the STT stream dies immediately; committed work is not
    // rolled back, and in-flight LLM/TTS results are discarded with the
    // outbound channel
    if let Some(mut handle) = stt_handle.take() {
        let _ = handle.finish().await;
    }
    if let Some(task) = stt_task.take() {
        task.abort();
    }
    {
        let mut pipeline = session.pipeline.lock().await;
        pipeline.gate.clear();
    }
    if let Err(e) = state.data.sessions.end(&session.id).await {
        tracing::debug!(session_id = %session.id, error = %e, "Session end persist failed");
    }
    state.sessions.remove(&session.id);
    tracing::info!(session_id = %session.id, "WebSocket closed");

    // dropping the last outbound sender ends the writer task, which sends
    // the clean close frame on its way out
    drop(session);
    let _ = writer_task.await;
}

async fn handle_control(
    state: &AppState,
    session: &Arc<Session>,
    message: ClientMessage,
    stt_handle: &mut Option<Box<dyn LiveTranscription>>,
    stt_task: &mut Option<tokio::task::JoinHandle<()>>,
) {
    match message {
        ClientMessage::VoiceStart { tts_provider } => {
            apply_tts_choice(session, tts_provider.as_deref());
            start_live_stt(state, session, stt_handle, stt_task).await;
            session
                .send(
                    ServerEvent::Started {
                        message: "Listening".to_string(),
                    }
                    .envelope(),
                )
                .await;
        }
        ClientMessage::VoiceStop => {
            if let Some(mut handle) = stt_handle.take() {
                let _ = handle.finish().await;
            }
            session
                .send(
                    ServerEvent::Stopped {
                        message: "Stopped listening".to_string(),
                    }
                    .envelope(),
                )
                .await;
        }
        ClientMessage::Transcript { text } | ClientMessage::Final { text, tts_provider: None } => {
            process_final_transcript(state, session, text).await;
        }
        ClientMessage::Final { text, tts_provider } => {
            apply_tts_choice(session, tts_provider.as_deref());
            process_final_transcript(state, session, text).await;
        }
        ClientMessage::RecordingStart => {
            *session.recording.write() = true;
            session.send(ServerEvent::RecordingStarted.envelope()).await;
        }
        ClientMessage::RecordingStop => {
            *session.recording.write() = false;
            session.send(ServerEvent::RecordingStopped.envelope()).await;
        }
    }
}

fn apply_tts_choice(session: &Arc<Session>, provider: Option<&str>) {
    if let Some(provider) = provider {
        let choice = if provider == "browser" {
            TtsChoice::Browser
        } else {
            TtsChoice::Server
        };
        *session.tts_choice.write() = choice;
    }
}

/// Open a live STT stream and spawn its event-producer task.
async fn start_live_stt(
    state: &AppState,
    session: &Arc<Session>,
    stt_handle: &mut Option<Box<dyn LiveTranscription>>,
    stt_task: &mut Option<tokio::task::JoinHandle<()>>,
) {
    if stt_handle.is_some() {
        return;
    }
    let Some(stt) = &state.stt else {
        return;
    };

    let (event_tx, mut event_rx) = mpsc::channel::<SttEvent>(32);
    match stt.create_live(event_tx).await {
        Ok(handle) => {
            *stt_handle = Some(handle);
            let state = state.clone();
            let session = session.clone();
            *stt_task = Some(tokio::spawn(async move {
                while let Some(event) = event_rx.recv().await {
                    match event {
                        SttEvent::Partial(text) => {
                            if !text.is_empty() {
                                session
                                    .send(
                                        ServerEvent::Transcript {
                                            text,
                                            is_final: false,
                                        }
                                        .envelope(),
                                    )
                                    .await;
                            }
                        }
                        SttEvent::Final(text) => {
                            // exactly one pipeline run per final event
                            if !text.trim().is_empty() {
                                process_final_transcript(&state, &session, text).await;
                            }
                        }
                        SttEvent::Error(error) => {
                            tracing::warn!(session_id = %session.id, error = %error, "STT stream error");
                            session.send(ServerEvent::Error { error }.envelope()).await;
                            break;
                        }
                    }
                }
            }));
        }
        Err(e) => {
            tracing::warn!(session_id = %session.id, error = %e, "Live STT unavailable");
            session
                .send(
                    ServerEvent::Error {
                        error: "speech recognition error".to_string(),
                    }
                    .envelope(),
                )
                .await;
        }
    }
}
