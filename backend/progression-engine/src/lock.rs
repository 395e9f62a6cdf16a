//! Per-user mutual exclusion around the read-modify-write of one event.
//!
//! Two implementations: a Redis lease (`SET NX PX` with a token-checked
//! release) for multi-process deployments, and an async mutex map for a
//! single process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::errors::{ProgressionError, Result};
use crate::utils::retry::{retry_async_when, RetryConfig};

const LOCK_KEY_PREFIX: &str = "progression:lock:";

// Deletes the key only if it still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// A held lock. Hand it back through [`UserLock::release`].
pub struct LockLease {
    pub user_id: String,
    token: String,
    _local: Option<OwnedMutexGuard<()>>,
}

#[async_trait]
pub trait UserLock: Send + Sync {
    async fn acquire(&self, user_id: &str) -> Result<LockLease>;

    async fn release(&self, lease: LockLease) -> Result<()>;
}

/// Lock table for a single process. Entries are dropped once nobody holds or waits on them.
#[derive(Default)]
pub struct InProcessUserLock {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl InProcessUserLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, user_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| ProgressionError::invalid("user lock table poisoned"))?;
        Ok(locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }
}

#[async_trait]
impl UserLock for InProcessUserLock {
    async fn acquire(&self, user_id: &str) -> Result<LockLease> {
        let guard = self.entry(user_id)?.lock_owned().await;
        Ok(LockLease {
            user_id: user_id.to_string(),
            token: Uuid::new_v4().to_string(),
            _local: Some(guard),
        })
    }

    async fn release(&self, lease: LockLease) -> Result<()> {
        let user_id = lease.user_id.clone();
        drop(lease);

        let mut locks = self
            .locks
            .lock()
            .map_err(|_| ProgressionError::invalid("user lock table poisoned"))?;
        // One reference lives in the map; anything more is a waiter.
        if locks
            .get(&user_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&user_id);
        }
        Ok(())
    }
}

/// Lease in Redis. The TTL bounds how long a crashed holder blocks the user.
pub struct RedisUserLock {
    redis: ConnectionManager,
    ttl: Duration,
    wait: RetryConfig,
}

impl RedisUserLock {
    pub fn new(redis: ConnectionManager, ttl: Duration) -> Self {
        Self {
            redis,
            ttl,
            wait: RetryConfig::lock_wait(),
        }
    }

    fn key(user_id: &str) -> String {
        format!("{}{}", LOCK_KEY_PREFIX, user_id)
    }

    async fn try_acquire(&self, user_id: &str, token: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(Self::key(user_id))
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .context("Failed to acquire user lock")?;

        match acquired {
            Some(_) => Ok(()),
            None => Err(ProgressionError::conflict(user_id)),
        }
    }
}

#[async_trait]
impl UserLock for RedisUserLock {
    async fn acquire(&self, user_id: &str) -> Result<LockLease> {
        let token = Uuid::new_v4().to_string();
        retry_async_when(
            self.wait.clone(),
            ProgressionError::is_retryable,
            || self.try_acquire(user_id, &token),
        )
        .await?;

        tracing::debug!("Acquired lock for user {}", user_id);
        Ok(LockLease {
            user_id: user_id.to_string(),
            token,
            _local: None,
        })
    }

    async fn release(&self, lease: LockLease) -> Result<()> {
        let mut conn = self.redis.clone();
        let released: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(Self::key(&lease.user_id))
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await
            .context("Failed to release user lock")?;

        if released == 0 {
            tracing::warn!(
                "Lock for user {} expired before release; another holder may have run concurrently",
                lease.user_id
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn in_process_lock_serializes_same_user() {
        let lock = Arc::new(InProcessUserLock::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let lease = lock.acquire("u1").await.unwrap();
                let now_inside = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now_inside, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                lock.release(lease).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(lock.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn different_users_do_not_block_each_other() {
        let lock = InProcessUserLock::new();
        let a = lock.acquire("a").await.unwrap();
        let b = tokio::time::timeout(Duration::from_millis(100), lock.acquire("b"))
            .await
            .expect("lock for another user should be free")
            .unwrap();
        lock.release(a).await.unwrap();
        lock.release(b).await.unwrap();
    }
}
