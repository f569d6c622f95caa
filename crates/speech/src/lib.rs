//! Speech adapters
//!
//! Two STT variants behind one interface — container-framed compressed
//! blocks (provider A) and raw 16-bit 16 kHz mono PCM (provider B) — plus
//! the batch TTS adapter with streamed bytes. Provider failures surface as
//! events; the session stays connected so the operator can retry.

pub mod stt;
pub mod tts;

pub use stt::{AudioFormat, LiveTranscription, SttEvent, SttProvider, StreamingHttpStt};
pub use tts::{buffer_to_base64, stream_to_buffer, HttpTts, TtsAudio, TtsProvider};

use thiserror::Error;

/// Speech adapter errors
#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stream closed")]
    StreamClosed,

    #[error("Unsupported configuration: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for SpeechError {
    fn from(err: reqwest::Error) -> Self {
        SpeechError::Network(err.to_string())
    }
}
