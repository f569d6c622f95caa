//! Session management
//!
//! A session owns everything scoped to one duplex connection: the ordered
//! outbound channel (the sole path to the client), the pipeline state the
//! intent lock serializes, language and TTS selection, and the recording
//! flag. The manager is the process-wide map plus capacity, idle cleanup,
//! and the shutdown drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dukaan_voice_core::Language;
use dukaan_voice_engine::{ConfirmationGate, SessionCtx};
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch, Mutex, Notify};

use crate::protocol::Envelope;
use crate::ServerError;

/// Client TTS selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsChoice {
    /// Server synthesizes and streams audio.
    Server,
    /// The browser synthesizer plays locally; the server skips synthesis.
    Browser,
}

/// State the per-session intent lock protects. Serializing on this mutex is
/// what keeps intent i from overtaking intent i-1 within a session.
pub struct PipelineState {
    pub ctx: SessionCtx,
    pub gate: ConfirmationGate,
}

/// One connected session.
pub struct Session {
    pub id: String,
    outbound: mpsc::Sender<Envelope>,
    /// The session's pipeline lock; held across a whole intent.
    pub pipeline: Mutex<PipelineState>,
    pub language: RwLock<Language>,
    pub tts_choice: RwLock<TtsChoice>,
    pub recording: RwLock<bool>,
    created_at: Instant,
    last_activity: RwLock<Instant>,
    active: AtomicBool,
    /// Poked to close the connection from the server side.
    pub close_signal: Notify,
}

impl Session {
    pub fn new(id: impl Into<String>, outbound: mpsc::Sender<Envelope>, is_admin: bool) -> Self {
        let id = id.into();
        let mut ctx = SessionCtx::new(id.clone());
        ctx.is_admin = is_admin;
        Self {
            id,
            outbound,
            pipeline: Mutex::new(PipelineState {
                ctx,
                gate: ConfirmationGate::new(),
            }),
            language: RwLock::new(Language::Hindi),
            tts_choice: RwLock::new(TtsChoice::Server),
            recording: RwLock::new(false),
            created_at: Instant::now(),
            last_activity: RwLock::new(Instant::now()),
            active: AtomicBool::new(true),
            close_signal: Notify::new(),
        }
    }

    /// Queue an envelope for the client. Ordering is the channel's order;
    /// a closed connection drops the message silently.
    pub async fn send(&self, envelope: Envelope) {
        if self.outbound.send(envelope).await.is_err() {
            tracing::debug!(session_id = %self.id, "Dropped envelope for closed session");
        }
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.read().elapsed() > timeout
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn close(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.close_signal.notify_waiters();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Session manager: the concurrent session map plus lifecycle policy.
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    max_sessions: usize,
    session_timeout: Duration,
    cleanup_interval: Duration,
    accepting: AtomicBool,
}

impl SessionManager {
    pub fn new(max_sessions: usize, session_timeout: Duration, cleanup_interval: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
            session_timeout,
            cleanup_interval,
            accepting: AtomicBool::new(true),
        }
    }

    /// Register a new session. Refused at capacity or while draining.
    pub fn create(
        &self,
        outbound: mpsc::Sender<Envelope>,
        is_admin: bool,
    ) -> Result<Arc<Session>, ServerError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ServerError::Session("Server is shutting down".to_string()));
        }
        if self.sessions.len() >= self.max_sessions {
            self.cleanup_expired();
            if self.sessions.len() >= self.max_sessions {
                return Err(ServerError::Session("Max sessions reached".to_string()));
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(&id, outbound, is_admin));
        self.sessions.insert(id.clone(), session.clone());
        tracing::info!(session_id = %id, is_admin, "Created session");
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| s.clone())
    }

    pub fn remove(&self, id: &str) {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.close();
            tracing::info!(session_id = %id, "Removed session");
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn cleanup_expired(&self) {
        let timeout = self.session_timeout;
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired(timeout))
            .map(|entry| entry.key().clone())
            .collect();
        for id in expired {
            self.remove(&id);
        }
    }

    /// Background task sweeping idle sessions. Returns the shutdown sender.
    pub fn start_cleanup_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let interval = manager.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let before = manager.count();
                        manager.cleanup_expired();
                        let after = manager.count();
                        if before != after {
                            tracing::info!(
                                removed = before - after,
                                remaining = after,
                                "Idle session cleanup"
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Graceful drain: stop accepting, wait up to `window` for sessions to
    /// end naturally, then close the rest with a clean close code.
    pub async fn drain(&self, window: Duration) {
        self.accepting.store(false, Ordering::SeqCst);
        tracing::info!(active = self.count(), "Draining sessions");

        let deadline = Instant::now() + window;
        while self.count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        let remaining: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        if !remaining.is_empty() {
            tracing::info!(count = remaining.len(), "Closing sessions past the drain window");
        }
        for id in remaining {
            self.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(2, Duration::from_secs(3600), Duration::from_secs(300))
    }

    fn outbound() -> mpsc::Sender<Envelope> {
        mpsc::channel(8).0
    }

    #[test]
    fn create_and_get() {
        let manager = manager();
        let session = manager.create(outbound(), false).unwrap();
        assert!(session.is_active());
        assert!(manager.get(&session.id).is_some());
        assert_eq!(manager.count(), 1);
    }

    #[test]
    fn capacity_is_enforced() {
        let manager = manager();
        manager.create(outbound(), false).unwrap();
        manager.create(outbound(), false).unwrap();
        assert!(manager.create(outbound(), false).is_err());
    }

    #[test]
    fn remove_closes_session() {
        let manager = manager();
        let session = manager.create(outbound(), false).unwrap();
        manager.remove(&session.id);
        assert!(!session.is_active());
        assert!(manager.get(&session.id).is_none());
    }

    #[tokio::test]
    async fn drain_refuses_new_sessions() {
        let manager = manager();
        manager.drain(Duration::from_millis(10)).await;
        assert!(manager.create(outbound(), false).is_err());
    }

    #[tokio::test]
    async fn drain_closes_lingering_sessions() {
        let manager = manager();
        let session = manager.create(outbound(), false).unwrap();
        manager.drain(Duration::from_millis(50)).await;
        assert_eq!(manager.count(), 0);
        assert!(!session.is_active());
    }
}
