use redis::AsyncCommands;
use uuid::Uuid;

use crate::models::job::Job;

const KEY_PREFIX: &str = "job:";

/// TTL for cached terminal jobs (they no longer change except through
/// webhook overwrites, which invalidate).
const TTL_TERMINAL_SECS: u64 = 3600;

/// TTL for cached non-terminal jobs.
const TTL_ACTIVE_SECS: u64 = 300;

/// Read-through, write-invalidate cache of job records.
///
/// Cache failures never propagate: a Redis error is logged and treated as a
/// miss, so a broken cache degrades to direct store reads.
pub struct StatusCache {
    client: redis::Client,
}

impl StatusCache {
    pub fn new(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    fn key(request_id: Uuid) -> String {
        format!("{KEY_PREFIX}{request_id}")
    }

    pub async fn get(&self, request_id: Uuid) -> Option<Job> {
        match self.try_get(request_id).await {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "cache read failed");
                None
            }
        }
    }

    pub async fn put(&self, job: &Job) {
        if let Err(e) = self.try_put(job).await {
            tracing::warn!(request_id = %job.request_id, error = %e, "cache write failed");
        }
    }

    pub async fn invalidate(&self, request_id: Uuid) {
        if let Err(e) = self.try_invalidate(request_id).await {
            tracing::warn!(request_id = %request_id, error = %e, "cache invalidate failed");
        }
    }

    async fn try_get(&self, request_id: Uuid) -> Result<Option<Job>, CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(Self::key(request_id)).await?;
        match raw {
            Some(serialized) => Ok(Some(serde_json::from_str(&serialized)?)),
            None => Ok(None),
        }
    }

    async fn try_put(&self, job: &Job) -> Result<(), CacheError> {
        let ttl = if job.status.is_terminal() {
            TTL_TERMINAL_SECS
        } else {
            TTL_ACTIVE_SECS
        };
        let serialized = serde_json::to_string(job)?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(Self::key(job.request_id), serialized, ttl)
            .await?;
        Ok(())
    }

    async fn try_invalidate(&self, request_id: Uuid) -> Result<(), CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(Self::key(request_id)).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
