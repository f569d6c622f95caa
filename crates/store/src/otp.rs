//! OTP store for the two-phase customer-data deletion
//!
//! A 6-digit code keyed by customer id with a 10-minute TTL. Verification
//! consumes the code on success so a replayed phase-2 intent cannot delete
//! twice.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use uuid::Uuid;

use crate::StoreError;

/// OTP lifetime.
pub const OTP_TTL: Duration = Duration::from_secs(600);

/// Generate a 6-digit code.
pub fn generate_otp() -> String {
    let mut rng = rand::thread_rng();
    format!("{:06}", rng.gen_range(0..1_000_000))
}

#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Store a code for the customer, replacing any previous one.
    async fn put(&self, customer_id: Uuid, code: &str) -> Result<(), StoreError>;

    /// Check and consume. `false` for wrong, expired, or absent codes.
    async fn verify(&self, customer_id: Uuid, code: &str) -> Result<bool, StoreError>;
}

/// In-process OTP store.
#[derive(Default)]
pub struct MemOtpStore {
    codes: Mutex<HashMap<Uuid, (String, Instant)>>,
}

impl MemOtpStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OtpStore for MemOtpStore {
    async fn put(&self, customer_id: Uuid, code: &str) -> Result<(), StoreError> {
        self.codes
            .lock()
            .insert(customer_id, (code.to_string(), Instant::now()));
        Ok(())
    }

    async fn verify(&self, customer_id: Uuid, code: &str) -> Result<bool, StoreError> {
        let mut codes = self.codes.lock();
        match codes.get(&customer_id) {
            Some((stored, at)) if at.elapsed() <= OTP_TTL && stored == code => {
                codes.remove(&customer_id);
                Ok(true)
            }
            Some((_, at)) if at.elapsed() > OTP_TTL => {
                codes.remove(&customer_id);
                Ok(false)
            }
            _ => Ok(false),
        }
    }
}

/// Redis-backed OTP store; the TTL rides on the key.
pub struct RedisOtpStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisOtpStore {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(customer_id: Uuid) -> String {
        format!("otp:delete:{customer_id}")
    }
}

#[async_trait]
impl OtpStore for RedisOtpStore {
    async fn put(&self, customer_id: Uuid, code: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(Self::key(customer_id))
            .arg(code)
            .arg("EX")
            .arg(OTP_TTL.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn verify(&self, customer_id: Uuid, code: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let key = Self::key(customer_id);
        let stored: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
        if stored.as_deref() == Some(code) {
            let _: () = redis::cmd("DEL").arg(&key).query_async(&mut conn).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_is_six_digits() {
        for _ in 0..50 {
            let code = generate_otp();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn verify_consumes_code() {
        let store = MemOtpStore::new();
        let id = Uuid::new_v4();
        store.put(id, "123456").await.unwrap();

        assert!(!store.verify(id, "000000").await.unwrap());
        assert!(store.verify(id, "123456").await.unwrap());
        // consumed: a replay fails
        assert!(!store.verify(id, "123456").await.unwrap());
    }
}
