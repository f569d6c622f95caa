//! TTS adapter
//!
//! Batch synthesis with streamed bytes: the provider responds with audio
//! chunks that convert to one buffer, then to base64 for the duplex
//! transport. Clients that picked the in-browser synthesizer skip the
//! server path entirely.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::SpeechError;

/// Synthesized audio.
#[derive(Debug, Clone)]
pub struct TtsAudio {
    pub bytes: Vec<u8>,
    /// "mp3" or "pcm", as advertised to the client.
    pub format: &'static str,
}

/// TTS provider contract.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    fn id(&self) -> &'static str;

    /// Synthesize the full text into one buffer.
    async fn synthesize(&self, text: &str, language: &str) -> Result<TtsAudio, SpeechError>;

    /// Streamed variant: audio chunks arrive on the channel as the
    /// provider produces them.
    async fn generate_speech_stream(
        &self,
        text: &str,
        language: &str,
        chunks: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), SpeechError>;
}

/// HTTP TTS provider.
pub struct HttpTts {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpTts {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    fn request(&self, text: &str, language: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/synthesize", self.endpoint.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "text": text,
                "language": language,
                "format": "mp3",
            }))
    }
}

#[async_trait]
impl TtsProvider for HttpTts {
    fn id(&self) -> &'static str {
        "http"
    }

    async fn synthesize(&self, text: &str, language: &str) -> Result<TtsAudio, SpeechError> {
        let response = self.request(text, language).send().await?;
        if !response.status().is_success() {
            return Err(SpeechError::Provider(format!(
                "synthesis failed: {}",
                response.status()
            )));
        }
        let bytes = response.bytes().await?.to_vec();
        Ok(TtsAudio {
            bytes,
            format: "mp3",
        })
    }

    async fn generate_speech_stream(
        &self,
        text: &str,
        language: &str,
        chunks: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), SpeechError> {
        let response = self.request(text, language).send().await?;
        if !response.status().is_success() {
            return Err(SpeechError::Provider(format!(
                "synthesis failed: {}",
                response.status()
            )));
        }
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if chunks.send(chunk.to_vec()).await.is_err() {
                // receiver gone: the session closed mid-playback
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Collect a chunk stream into one buffer.
pub async fn stream_to_buffer(mut chunks: mpsc::Receiver<Vec<u8>>) -> Vec<u8> {
    let mut buffer = Vec::new();
    while let Some(chunk) = chunks.recv().await {
        buffer.extend_from_slice(&chunk);
    }
    buffer
}

/// Base64 for the duplex transport.
pub fn buffer_to_base64(buffer: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    STANDARD.encode(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_to_buffer_concatenates() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(vec![1, 2]).await.unwrap();
        tx.send(vec![3]).await.unwrap();
        drop(tx);
        assert_eq!(stream_to_buffer(rx).await, vec![1, 2, 3]);
    }

    #[test]
    fn base64_is_transport_safe() {
        assert_eq!(buffer_to_base64(&[0xff, 0x00, 0x7f]), "/wB/");
    }
}
