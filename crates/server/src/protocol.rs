//! Duplex session protocol
//!
//! Text frames are JSON envelopes `{type, data?, timestamp}`. Binary frames
//! from the client carry audio only. The server→client message set and its
//! ordering guarantees are what the web client renders against.

use chrono::{DateTime, Utc};
use dukaan_voice_core::{ExecutionResult, Language};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Outbound wire envelope.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data: Some(data),
            timestamp: Utc::now(),
        }
    }

    pub fn bare(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Typed server→client events; `envelope()` produces the wire form.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Start {
        session_id: String,
        stt_available: bool,
        tts_available: bool,
        stt_provider: Option<String>,
        tts_provider: Option<String>,
    },
    Started {
        message: String,
    },
    Stopped {
        message: String,
    },
    Transcript {
        text: String,
        is_final: bool,
    },
    Thinking {
        transcript: String,
    },
    Intent {
        intent: String,
        normalized: String,
        confidence: f32,
        entities: Value,
    },
    ResponseChunk {
        text: String,
    },
    Response {
        text: String,
        execution_result: Option<ExecutionResult>,
    },
    TtsStream {
        audio_base64: String,
        format: String,
        provider: String,
    },
    ConfirmNeeded {
        text: String,
        intent: String,
        confidence: f32,
    },
    LanguageChanged {
        language: Language,
        text: String,
    },
    RecordingStarted,
    RecordingStopped,
    Error {
        error: String,
    },
}

impl ServerEvent {
    pub fn envelope(self) -> Envelope {
        match self {
            Self::Start {
                session_id,
                stt_available,
                tts_available,
                stt_provider,
                tts_provider,
            } => Envelope::new(
                "voice:start",
                json!({
                    "sessionId": session_id,
                    "sttAvailable": stt_available,
                    "ttsAvailable": tts_available,
                    "sttProvider": stt_provider,
                    "ttsProvider": tts_provider,
                }),
            ),
            Self::Started { message } => Envelope::new("voice:started", json!({ "message": message })),
            Self::Stopped { message } => Envelope::new("voice:stopped", json!({ "message": message })),
            Self::Transcript { text, is_final } => Envelope::new(
                "voice:transcript",
                json!({ "text": text, "isFinal": is_final }),
            ),
            Self::Thinking { transcript } => {
                Envelope::new("voice:thinking", json!({ "transcript": transcript }))
            }
            Self::Intent {
                intent,
                normalized,
                confidence,
                entities,
            } => Envelope::new(
                "voice:intent",
                json!({
                    "intent": intent,
                    "normalized": normalized,
                    "confidence": confidence,
                    "entities": entities,
                }),
            ),
            Self::ResponseChunk { text } => {
                Envelope::new("voice:response:chunk", json!({ "text": text }))
            }
            Self::Response {
                text,
                execution_result,
            } => Envelope::new(
                "voice:response",
                json!({ "text": text, "executionResult": execution_result }),
            ),
            Self::TtsStream {
                audio_base64,
                format,
                provider,
            } => Envelope::new(
                "voice:tts-stream",
                json!({ "audio": audio_base64, "format": format, "provider": provider }),
            ),
            Self::ConfirmNeeded {
                text,
                intent,
                confidence,
            } => Envelope::new(
                "voice:confirm_needed",
                json!({ "text": text, "intent": intent, "confidence": confidence }),
            ),
            Self::LanguageChanged { language, text } => Envelope::new(
                "voice:language_changed",
                json!({ "language": language.code(), "text": text }),
            ),
            Self::RecordingStarted => Envelope::bare("recording:started"),
            Self::RecordingStopped => Envelope::bare("recording:stopped"),
            Self::Error { error } => Envelope::new("error", json!({ "error": error })),
        }
    }
}

/// Inbound text frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// Parsed client message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `voice:start` — selects the client's desired TTS provider.
    VoiceStart { tts_provider: Option<String> },
    VoiceStop,
    /// Manual-testing path: inject a transcript.
    Transcript { text: String },
    /// Inject a final transcript, bypassing audio.
    Final {
        text: String,
        tts_provider: Option<String>,
    },
    RecordingStart,
    RecordingStop,
}

impl ClientMessage {
    /// Parse a text frame. `None` for unknown types — the session replies
    /// with a protocol `error` frame.
    pub fn parse(frame: &ClientFrame) -> Option<Self> {
        let text_field = |key: &str| {
            frame
                .data
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        match frame.kind.as_str() {
            "voice:start" => Some(Self::VoiceStart {
                tts_provider: text_field("ttsProvider"),
            }),
            "voice:stop" => Some(Self::VoiceStop),
            "voice:transcript" => Some(Self::Transcript {
                text: text_field("text").unwrap_or_default(),
            }),
            "voice:final" => Some(Self::Final {
                text: text_field("text").unwrap_or_default(),
                tts_provider: text_field("ttsProvider"),
            }),
            "recording:start" => Some(Self::RecordingStart),
            "recording:stop" => Some(Self::RecordingStop),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wire_shape() {
        let envelope = ServerEvent::Transcript {
            text: "Rahul ka balance".to_string(),
            is_final: true,
        }
        .envelope();
        let value: Value = serde_json::from_str(&envelope.to_json()).unwrap();
        assert_eq!(value["type"], "voice:transcript");
        assert_eq!(value["data"]["text"], "Rahul ka balance");
        assert_eq!(value["data"]["isFinal"], true);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn bare_envelope_omits_data() {
        let value: Value =
            serde_json::from_str(&ServerEvent::RecordingStarted.envelope().to_json()).unwrap();
        assert_eq!(value["type"], "recording:started");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn client_frames_parse() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"voice:final","data":{"text":"Bharat ka balance"},"timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(
            ClientMessage::parse(&frame),
            Some(ClientMessage::Final {
                text: "Bharat ka balance".to_string(),
                tts_provider: None
            })
        );

        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"bogus:frame","data":{}}"#).unwrap();
        assert_eq!(ClientMessage::parse(&frame), None);
    }
}
