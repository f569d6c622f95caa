//! Transactional data services
//!
//! Every intent maps to one transactional write exposed as a named method on
//! a store trait. Two implementations ship side by side:
//!
//! - `PgStore` — Postgres via sqlx, the production path
//! - `MemStore` — in-memory, the fallback when persistence is disabled and
//!   the substrate for hermetic tests
//!
//! Reads go through a two-tier cache (in-process LRU with TTL, fronted by a
//! cross-process key-value cache); writes invalidate by prefix.

pub mod cache;
pub mod error;
pub mod mem;
pub mod otp;
pub mod postgres;
pub mod traits;

pub use cache::{
    context_hash, llm_cache_key, CachePolicy, CacheScope, KvTier, NullKv, RedisKv, TieredCache,
};
pub use error::StoreError;
pub use mem::MemStore;
pub use otp::{generate_otp, MemOtpStore, OtpStore, RedisOtpStore, OTP_TTL};
pub use postgres::PgStore;
pub use traits::{
    CustomerStore, InvoiceStore, LedgerStore, NewInvoice, NewInvoiceLine, ProductStore,
    PurgeReport, ReminderStore, SessionStore,
};

use std::sync::Arc;

/// The wired data-service graph handed to the business engine and the
/// reminder scheduler. One backing store implements every trait; this
/// struct is the seam that keeps callers backend-agnostic.
#[derive(Clone)]
pub struct DataServices {
    pub customers: Arc<dyn CustomerStore>,
    pub products: Arc<dyn ProductStore>,
    pub invoices: Arc<dyn InvoiceStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub reminders: Arc<dyn ReminderStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub otp: Arc<dyn OtpStore>,
    pub cache: Arc<TieredCache>,
}

impl DataServices {
    /// In-memory services for development and tests.
    pub fn in_memory() -> Self {
        let store = Arc::new(MemStore::new());
        Self {
            customers: store.clone(),
            products: store.clone(),
            invoices: store.clone(),
            ledger: store.clone(),
            reminders: store.clone(),
            sessions: store,
            otp: Arc::new(MemOtpStore::new()),
            cache: Arc::new(TieredCache::local_only(100, std::time::Duration::from_secs(300))),
        }
    }

    /// Postgres-backed services. `redis` is optional; without it the OTP
    /// store and cache stay in-process.
    pub async fn postgres(
        url: &str,
        max_connections: u32,
        redis: Option<redis::aio::ConnectionManager>,
        cache: Arc<TieredCache>,
    ) -> Result<Self, StoreError> {
        let store = Arc::new(PgStore::connect(url, max_connections).await?);
        let otp: Arc<dyn OtpStore> = match redis {
            Some(conn) => Arc::new(RedisOtpStore::new(conn)),
            None => Arc::new(MemOtpStore::new()),
        };
        Ok(Self {
            customers: store.clone(),
            products: store.clone(),
            invoices: store.clone(),
            ledger: store.clone(),
            reminders: store.clone(),
            sessions: store,
            otp,
            cache,
        })
    }
}
