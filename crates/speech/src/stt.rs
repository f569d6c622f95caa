//! STT adapter
//!
//! `create_live` opens one provider stream per spoken utterance window and
//! returns a handle with `send(frame)` / `finish()`. Partials arrive through
//! the event channel; only a final event with non-empty text advances the
//! command pipeline, exactly once per final.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::SpeechError;

/// What the client is expected to send for a given provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// Compressed container blocks forwarded opaquely (provider A).
    Container,
    /// Raw 16-bit little-endian PCM, 16 kHz mono (provider B).
    Pcm16k,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Pcm16k => "pcm",
        }
    }
}

/// Transcription events delivered to the session.
#[derive(Debug, Clone)]
pub enum SttEvent {
    /// Interim hypothesis; display only.
    Partial(String),
    /// Final transcript; triggers the pipeline when non-empty.
    Final(String),
    /// Provider failure: the handle is dead, the session is not.
    Error(String),
}

/// Live transcription handle.
#[async_trait]
pub trait LiveTranscription: Send {
    /// Feed one audio frame.
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), SpeechError>;

    /// Close the audio stream; the provider flushes its final transcript.
    async fn finish(&mut self) -> Result<(), SpeechError>;
}

/// STT provider contract. One provider instance serves every session.
#[async_trait]
pub trait SttProvider: Send + Sync {
    fn id(&self) -> &'static str;

    /// The audio format this provider expects from the client.
    fn audio_format(&self) -> AudioFormat;

    /// Open a live stream. Events flow into `events` until the stream ends
    /// or errors.
    async fn create_live(
        &self,
        events: mpsc::Sender<SttEvent>,
    ) -> Result<Box<dyn LiveTranscription>, SpeechError>;

    /// Batch path used by the manual-testing flow.
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, SpeechError>;
}

/// Provider wire events (a JSON-lines response stream).
#[derive(Debug, Deserialize)]
struct ProviderEvent {
    #[serde(default)]
    text: String,
    #[serde(default)]
    is_final: bool,
}

/// HTTP streaming STT: frames go up a chunked request body, transcript
/// events come back as JSON lines. Covers both provider variants; only the
/// advertised audio format and endpoint differ.
pub struct StreamingHttpStt {
    client: reqwest::Client,
    id: &'static str,
    endpoint: String,
    api_key: String,
    format: AudioFormat,
}

impl StreamingHttpStt {
    pub fn container(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            id: "container",
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            format: AudioFormat::Container,
        }
    }

    pub fn pcm(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            id: "pcm",
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            format: AudioFormat::Pcm16k,
        }
    }

    fn stream_url(&self) -> String {
        let base = self.endpoint.trim_end_matches('/');
        match self.format {
            AudioFormat::Container => format!("{base}/listen"),
            AudioFormat::Pcm16k => {
                format!("{base}/listen?encoding=linear16&sample_rate=16000&channels=1")
            }
        }
    }
}

#[async_trait]
impl SttProvider for StreamingHttpStt {
    fn id(&self) -> &'static str {
        self.id
    }

    fn audio_format(&self) -> AudioFormat {
        self.format
    }

    async fn create_live(
        &self,
        events: mpsc::Sender<SttEvent>,
    ) -> Result<Box<dyn LiveTranscription>, SpeechError> {
        let (frame_tx, frame_rx) = mpsc::channel::<Result<Vec<u8>, std::io::Error>>(64);

        let body = reqwest::Body::wrap_stream(tokio_stream::wrappers::ReceiverStream::new(
            frame_rx,
        ));
        let request = self
            .client
            .post(self.stream_url())
            .bearer_auth(&self.api_key)
            .header("content-type", "application/octet-stream")
            .body(body);

        // the response stream is read by a producer task for the session
        let events_clone = events.clone();
        tokio::spawn(async move {
            let response = match request.send().await {
                Ok(response) if response.status().is_success() => response,
                Ok(response) => {
                    let _ = events_clone
                        .send(SttEvent::Error(format!(
                            "speech recognition error: {}",
                            response.status()
                        )))
                        .await;
                    return;
                }
                Err(e) => {
                    let _ = events_clone
                        .send(SttEvent::Error(format!("speech recognition error: {e}")))
                        .await;
                    return;
                }
            };

            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = events_clone
                            .send(SttEvent::Error(format!("speech recognition error: {e}")))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ProviderEvent>(&line) {
                        Ok(event) => {
                            let out = if event.is_final {
                                SttEvent::Final(event.text)
                            } else {
                                SttEvent::Partial(event.text)
                            };
                            if events_clone.send(out).await.is_err() {
                                return; // session gone
                            }
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "Unparsable STT event line skipped");
                        }
                    }
                }
            }
        });

        Ok(Box::new(HttpLiveTranscription {
            frames: Some(frame_tx),
        }))
    }

    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, SpeechError> {
        let base = self.endpoint.trim_end_matches('/');
        let response = self
            .client
            .post(format!("{base}/transcribe"))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/octet-stream")
            .body(audio)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SpeechError::Provider(format!(
                "transcription failed: {}",
                response.status()
            )));
        }
        let parsed: ProviderEvent = response
            .json()
            .await
            .map_err(|e| SpeechError::Provider(e.to_string()))?;
        Ok(parsed.text)
    }
}

struct HttpLiveTranscription {
    frames: Option<mpsc::Sender<Result<Vec<u8>, std::io::Error>>>,
}

#[async_trait]
impl LiveTranscription for HttpLiveTranscription {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), SpeechError> {
        let Some(frames) = &self.frames else {
            return Err(SpeechError::StreamClosed);
        };
        frames
            .send(Ok(frame))
            .await
            .map_err(|_| SpeechError::StreamClosed)
    }

    async fn finish(&mut self) -> Result<(), SpeechError> {
        // dropping the sender closes the request body; the provider flushes
        self.frames = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_advertise_correctly() {
        let a = StreamingHttpStt::container("http://stt.test", "k");
        assert_eq!(a.audio_format(), AudioFormat::Container);
        let b = StreamingHttpStt::pcm("http://stt.test", "k");
        assert_eq!(b.audio_format(), AudioFormat::Pcm16k);
        assert!(b.stream_url().contains("encoding=linear16"));
        assert!(b.stream_url().contains("sample_rate=16000"));
    }

    #[tokio::test]
    async fn finish_closes_the_frame_stream() {
        let (tx, _rx) = mpsc::channel(4);
        let mut handle = HttpLiveTranscription { frames: Some(tx) };
        handle.send(vec![0u8; 320]).await.unwrap();
        handle.finish().await.unwrap();
        assert!(matches!(
            handle.send(vec![0u8; 320]).await,
            Err(SpeechError::StreamClosed)
        ));
    }
}
