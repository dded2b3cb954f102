//! Permission-notice rate-limiter. Keyed by `(chat_id_hash, source_user_hash)` — both required,
//! non-empty. Backing store is an external key-value service with TTL; the
//! core depends only on `set/get/delete` with expiry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use calorie_core::hashing::require_non_empty_hash;
use calorie_core::types::PermissionNotice;
use chrono::Utc;
use thiserror::Error;

/// TTL for a permission notice: 24 hours.
pub const INLINE_PERMISSION_TTL_SECONDS: u64 = 86_400;

#[derive(Debug, Error)]
pub enum PermissionStoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PermissionStoreError>;

fn build_permission_key(chat_hash: &str, user_hash: &str) -> String {
    format!("inline:permission:{chat_hash}:{user_hash}")
}

fn validate_keys(chat_hash: &str, user_hash: &str) -> Result<()> {
    require_non_empty_hash("chat_id_hash", chat_hash)
        .map_err(|e| PermissionStoreError::InvalidArgument(e.to_string()))?;
    require_non_empty_hash("source_user_hash", user_hash)
        .map_err(|e| PermissionStoreError::InvalidArgument(e.to_string()))?;
    Ok(())
}

/// Named interface the dispatcher (C6) and worker (C8) depend on. Swappable
/// for a fresh in-memory instance in tests.
#[async_trait]
pub trait PermissionNoticeStore: Send + Sync {
    async fn mark(&self, chat_hash: &str, user_hash: &str) -> Result<PermissionNotice>;
    async fn get(&self, chat_hash: &str, user_hash: &str) -> Result<Option<PermissionNotice>>;
    async fn due(&self, chat_hash: &str, user_hash: &str) -> Result<bool>;
    async fn clear(&self, chat_hash: &str, user_hash: &str) -> Result<()>;
}

/// Redis-backed store using `SET ... EX` / `GET` / `DEL`.
pub struct RedisPermissionNoticeStore {
    client: redis::Client,
}

impl RedisPermissionNoticeStore {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client =
            redis::Client::open(redis_url).map_err(|e| PermissionStoreError::Store(e.to_string()))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| PermissionStoreError::Store(e.to_string()))
    }
}

#[async_trait]
impl PermissionNoticeStore for RedisPermissionNoticeStore {
    async fn mark(&self, chat_hash: &str, user_hash: &str) -> Result<PermissionNotice> {
        validate_keys(chat_hash, user_hash)?;
        let notice = PermissionNotice {
            chat_id_hash: chat_hash.to_string(),
            source_user_hash: user_hash.to_string(),
            last_notified_at: Utc::now(),
        };
        let payload = serde_json::to_string(&notice)?;
        let key = build_permission_key(chat_hash, user_hash);

        let mut conn = self.connection().await?;
        redis::cmd("SET")
            .arg(&key)
            .arg(&payload)
            .arg("EX")
            .arg(INLINE_PERMISSION_TTL_SECONDS)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| PermissionStoreError::Store(e.to_string()))?;

        Ok(notice)
    }

    async fn get(&self, chat_hash: &str, user_hash: &str) -> Result<Option<PermissionNotice>> {
        validate_keys(chat_hash, user_hash)?;
        let key = build_permission_key(chat_hash, user_hash);
        let mut conn = self.connection().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| PermissionStoreError::Store(e.to_string()))?;

        match raw {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// True iff `get` returns none (or is expired) — redis's own TTL
    /// eviction handles expiry, so this is simply the absence check. Store
    /// errors are treated fail-open: the caller sees `due = true` rather
    /// than propagating the error.
    async fn due(&self, chat_hash: &str, user_hash: &str) -> Result<bool> {
        match self.get(chat_hash, user_hash).await {
            Ok(notice) => Ok(notice.is_none()),
            Err(PermissionStoreError::InvalidArgument(e)) => {
                Err(PermissionStoreError::InvalidArgument(e))
            }
            Err(e) => {
                tracing::warn!(error = %e, "permission store unreachable, failing open (due=true)");
                Ok(true)
            }
        }
    }

    async fn clear(&self, chat_hash: &str, user_hash: &str) -> Result<()> {
        validate_keys(chat_hash, user_hash)?;
        let key = build_permission_key(chat_hash, user_hash);
        let mut conn = self.connection().await?;
        redis::cmd("DEL")
            .arg(&key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| PermissionStoreError::Store(e.to_string()))?;
        Ok(())
    }
}

/// In-process store for tests and local dev — a `Mutex<HashMap>` with
/// manual expiry checks instead of Redis's own TTL eviction.
#[derive(Default)]
pub struct InMemoryPermissionNoticeStore {
    entries: Mutex<HashMap<(String, String), (PermissionNotice, Instant)>>,
}

impl InMemoryPermissionNoticeStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key(chat_hash: &str, user_hash: &str) -> (String, String) {
        (chat_hash.to_string(), user_hash.to_string())
    }
}

#[async_trait]
impl PermissionNoticeStore for InMemoryPermissionNoticeStore {
    async fn mark(&self, chat_hash: &str, user_hash: &str) -> Result<PermissionNotice> {
        validate_keys(chat_hash, user_hash)?;
        let notice = PermissionNotice {
            chat_id_hash: chat_hash.to_string(),
            source_user_hash: user_hash.to_string(),
            last_notified_at: Utc::now(),
        };
        let expires_at = Instant::now() + Duration::from_secs(INLINE_PERMISSION_TTL_SECONDS);
        self.entries
            .lock()
            .unwrap()
            .insert(Self::key(chat_hash, user_hash), (notice.clone(), expires_at));
        Ok(notice)
    }

    async fn get(&self, chat_hash: &str, user_hash: &str) -> Result<Option<PermissionNotice>> {
        validate_keys(chat_hash, user_hash)?;
        let mut entries = self.entries.lock().unwrap();
        let key = Self::key(chat_hash, user_hash);
        match entries.get(&key) {
            Some((notice, expires_at)) if Instant::now() < *expires_at => Ok(Some(notice.clone())),
            Some(_) => {
                entries.remove(&key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Never fails, so fail-open never applies here — this
    /// store's `due` is a plain absence-or-expiry check.
    async fn due(&self, chat_hash: &str, user_hash: &str) -> Result<bool> {
        Ok(self.get(chat_hash, user_hash).await?.is_none())
    }

    async fn clear(&self, chat_hash: &str, user_hash: &str) -> Result<()> {
        validate_keys(chat_hash, user_hash)?;
        self.entries
            .lock()
            .unwrap()
            .remove(&Self::key(chat_hash, user_hash));
        Ok(())
    }
}
