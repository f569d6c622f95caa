//! Application state
//!
//! The construction-time dependency graph: data services → reminder
//! scheduler/worker → business engine → extractor/responder → session
//! manager, plus the STT/TTS adapters. No module-scope singletons; tests
//! wire the same graph over the in-memory services.

use std::sync::Arc;
use std::time::Duration;

use dukaan_voice_config::Settings;
use dukaan_voice_engine::{BusinessEngine, ResponseGenerator};
use dukaan_voice_llm::{ChatBackend, LlmFactory, LlmProviderConfig};
use dukaan_voice_nlu::IntentExtractor;
use dukaan_voice_scheduler::{
    EmailSender, InMemoryJobQueue, JobQueue, LogMailer, LogWhatsApp, Mailer, RedisJobQueue,
    ReminderChannel, ReminderScheduler, ReminderWorker, SmtpMailer, WhatsAppChannel,
    WhatsAppSender, WorkerConfig,
};
use dukaan_voice_speech::{HttpTts, StreamingHttpStt, SttProvider, TtsProvider};
use dukaan_voice_store::{DataServices, MemStore, NullKv, RedisKv, TieredCache};
use tokio::sync::watch;

use crate::session::SessionManager;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub sessions: Arc<SessionManager>,
    pub data: DataServices,
    pub engine: Arc<BusinessEngine>,
    pub extractor: Arc<IntentExtractor>,
    pub responder: Arc<ResponseGenerator>,
    pub stt: Option<Arc<dyn SttProvider>>,
    pub tts: Option<Arc<dyn TtsProvider>>,
    /// Flipping this drains the reminder worker.
    pub worker_shutdown: watch::Sender<bool>,
    /// Stops the idle-session sweeper.
    pub cleanup_shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Wire the whole graph from settings.
    pub async fn build(config: Settings) -> anyhow::Result<Self> {
        let tz = config.tz();

        // --- cross-process clients -----------------------------------------
        let redis_conn = if config.cache.enabled {
            match redis::Client::open(config.cache.redis_url.as_str()) {
                Ok(client) => match redis::aio::ConnectionManager::new(client).await {
                    Ok(conn) => {
                        tracing::info!("Connected to key-value cache");
                        Some(conn)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Key-value cache unavailable, using in-process only");
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Bad redis URL, using in-process cache only");
                    None
                }
            }
        } else {
            None
        };

        let cache = Arc::new(TieredCache::new(
            config.cache.local_capacity,
            Duration::from_secs(config.cache.local_ttl_secs),
            match redis_conn.clone() {
                Some(conn) => Box::new(RedisKv::new(conn)),
                None => Box::new(NullKv),
            },
            Duration::from_secs(config.cache.remote_ttl_secs),
        ));

        // --- data services -------------------------------------------------
        let data = if config.database.enabled {
            tracing::info!("Connecting to Postgres");
            DataServices::postgres(
                &config.database.url,
                config.database.max_connections,
                redis_conn.clone(),
                cache.clone(),
            )
            .await?
        } else {
            tracing::info!("Persistence disabled, using in-memory data services");
            let store = Arc::new(MemStore::new());
            DataServices {
                customers: store.clone(),
                products: store.clone(),
                invoices: store.clone(),
                ledger: store.clone(),
                reminders: store.clone(),
                sessions: store,
                otp: Arc::new(dukaan_voice_store::MemOtpStore::new()),
                cache: cache.clone(),
            }
        };

        // --- reminder scheduler and worker ---------------------------------
        let queue: Arc<dyn JobQueue> = match redis_conn {
            Some(conn) => Arc::new(RedisJobQueue::new(conn)),
            None => Arc::new(InMemoryJobQueue::new()),
        };
        let scheduler = Arc::new(ReminderScheduler::new(
            data.reminders.clone(),
            data.customers.clone(),
            queue.clone(),
            tz,
        ));

        let mailer: Arc<dyn Mailer> = if config.email.smtp_host.is_empty() {
            Arc::new(LogMailer)
        } else {
            Arc::new(SmtpMailer::new(
                &config.email.smtp_host,
                config.email.smtp_port,
                &config.email.username,
                &config.email.password,
                &config.email.from,
            )?)
        };
        let whatsapp: Arc<dyn WhatsAppChannel> = Arc::new(LogWhatsApp);

        let channels: Vec<Arc<dyn ReminderChannel>> = vec![
            Arc::new(WhatsAppSender::new(whatsapp.clone())),
            Arc::new(EmailSender::new(mailer.clone())),
        ];
        let worker = ReminderWorker::new(
            queue,
            data.reminders.clone(),
            data.customers.clone(),
            channels,
            WorkerConfig::default(),
        );
        let (worker_shutdown, worker_rx) = watch::channel(false);
        tokio::spawn(async move { worker.run(worker_rx).await });

        // --- business engine -----------------------------------------------
        let engine = Arc::new(BusinessEngine::new(
            data.clone(),
            scheduler,
            mailer,
            whatsapp,
            config.email.admin_email.clone(),
            tz,
        ));

        // --- LLM: extractor on the primary, responses preferring the
        //     low-latency provider ------------------------------------------
        let llm_timeout = Duration::from_millis(config.llm.timeout_ms);
        let primary = LlmFactory::create(
            &LlmProviderConfig::new(&config.llm.endpoint, &config.llm.model)
                .with_api_key(&config.llm.api_key)
                .with_timeout(llm_timeout),
        )?;
        let extractor = Arc::new(IntentExtractor::new(primary.clone(), llm_timeout));

        let response_backend: Arc<dyn ChatBackend> = match (
            &config.llm.realtime_endpoint,
            &config.llm.realtime_model,
        ) {
            (Some(endpoint), Some(model)) => LlmFactory::create(
                &LlmProviderConfig::new(endpoint, model)
                    .with_api_key(&config.llm.api_key)
                    .with_timeout(llm_timeout),
            )?,
            _ => primary,
        };
        let responder = Arc::new(ResponseGenerator::new(
            Some(response_backend),
            cache.clone(),
        ));

        // --- speech adapters -----------------------------------------------
        let stt: Option<Arc<dyn SttProvider>> = if config.speech.stt_endpoint.is_empty() {
            tracing::warn!("No STT endpoint configured; only text frames will work");
            None
        } else if config.speech.stt_provider == "pcm" {
            Some(Arc::new(StreamingHttpStt::pcm(
                &config.speech.stt_endpoint,
                &config.speech.stt_api_key,
            )))
        } else {
            Some(Arc::new(StreamingHttpStt::container(
                &config.speech.stt_endpoint,
                &config.speech.stt_api_key,
            )))
        };

        let tts: Option<Arc<dyn TtsProvider>> = if config.speech.tts_endpoint.is_empty() {
            tracing::warn!("No TTS endpoint configured; responses will be text-only");
            None
        } else {
            Some(Arc::new(HttpTts::new(
                &config.speech.tts_endpoint,
                &config.speech.tts_api_key,
            )))
        };

        // --- session manager -----------------------------------------------
        let sessions = Arc::new(SessionManager::new(
            config.server.max_sessions,
            Duration::from_secs(config.server.session_timeout_secs),
            Duration::from_secs(config.server.cleanup_interval_secs),
        ));
        let cleanup_shutdown = sessions.start_cleanup_task();

        Ok(Self {
            config: Arc::new(config),
            sessions,
            data,
            engine,
            extractor,
            responder,
            stt,
            tts,
            worker_shutdown,
            cleanup_shutdown,
        })
    }

    /// Shutdown order: sessions drained by the caller first, then the
    /// reminder worker, then client connections die with the process.
    pub async fn shutdown(&self) {
        let _ = self.worker_shutdown.send(true);
        let _ = self.cleanup_shutdown.send(true);
    }
}
