use chrono::{DateTime, Utc};
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamMaxlen, StreamReadOptions,
    StreamReadReply,
};
use redis::AsyncCommands;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

const STREAM_KEY: &str = "job-queue";

/// Consumer group shared by the worker fleet.
pub const WORKERS_GROUP: &str = "workers";

/// A queue message as delivered to a consumer. Owned by the queue until
/// acknowledged.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub message_id: String,
    pub request_id: Uuid,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
}

/// Redis-stream backed job queue with consumer groups and at-least-once
/// redelivery via `XAUTOCLAIM`.
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Append a message; returns the assigned stream ID (monotone in time).
    pub async fn enqueue(&self, request_id: Uuid, payload: &Value) -> Result<String, QueueError> {
        let mut conn = self.conn().await?;
        let fields = [
            ("request_id", request_id.to_string()),
            ("payload", payload.to_string()),
            ("enqueued_at", Utc::now().to_rfc3339()),
        ];
        let message_id: String = conn
            .xadd(STREAM_KEY, "*", &fields)
            .await
            .map_err(QueueError::Redis)?;
        Ok(message_id)
    }

    /// Create the consumer group if it does not exist yet.
    pub async fn ensure_consumer_group(&self, group: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        match conn
            .xgroup_create_mkstream::<_, _, _, String>(STREAM_KEY, group, "$")
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::Redis(e)),
        }
    }

    /// Read up to `count` messages not yet delivered to this group, blocking
    /// up to `block` when none are available. A blocking timeout returns an
    /// empty batch.
    pub async fn consume(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut conn = self.conn().await?;
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[STREAM_KEY], &[">"], &options)
            .await
            .map_err(QueueError::Redis)?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let mut messages = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                match Self::decode_entry(&entry) {
                    Ok(message) => messages.push(message),
                    Err(e) => {
                        // Drop poison messages so they are not redelivered forever.
                        tracing::error!(
                            message_id = %entry.id,
                            error = %e,
                            "dropping malformed queue message"
                        );
                        self.ack(group, &entry.id).await?;
                    }
                }
            }
        }
        Ok(messages)
    }

    /// Remove a message from the group's pending set.
    pub async fn ack(&self, group: &str, message_id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        conn.xack::<_, _, _, i64>(STREAM_KEY, group, &[message_id])
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Claim deliveries that have been pending longer than `min_idle` for
    /// this consumer. This is the at-least-once redelivery path for messages
    /// whose original consumer died before acknowledging.
    pub async fn claim_stale(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut conn = self.conn().await?;
        let options = StreamAutoClaimOptions::default().count(count);
        let reply: StreamAutoClaimReply = conn
            .xautoclaim_options(
                STREAM_KEY,
                group,
                consumer,
                min_idle.as_millis() as usize,
                "0-0",
                options,
            )
            .await
            .map_err(QueueError::Redis)?;

        let mut messages = Vec::new();
        for entry in &reply.claimed {
            match Self::decode_entry(entry) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    tracing::error!(
                        message_id = %entry.id,
                        error = %e,
                        "dropping malformed claimed message"
                    );
                    self.ack(group, &entry.id).await?;
                }
            }
        }
        Ok(messages)
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Total number of messages in the stream.
    pub async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        let depth: u64 = conn.xlen(STREAM_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    /// Bound the stream. Acked entries stay in a Redis stream until trimmed,
    /// so a maintenance loop calls this periodically.
    pub async fn trim(&self, max_len: usize) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        conn.xtrim::<_, i64>(STREAM_KEY, StreamMaxlen::Approx(max_len))
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    fn decode_entry(entry: &StreamId) -> Result<QueueMessage, QueueError> {
        let request_id: String = entry
            .get("request_id")
            .ok_or_else(|| QueueError::Malformed("missing request_id field".to_string()))?;
        let request_id = Uuid::parse_str(&request_id)
            .map_err(|e| QueueError::Malformed(format!("bad request_id: {e}")))?;

        let payload: String = entry
            .get("payload")
            .ok_or_else(|| QueueError::Malformed("missing payload field".to_string()))?;
        let payload: Value = serde_json::from_str(&payload).map_err(QueueError::Serialize)?;

        let enqueued_at = entry
            .get::<String>("enqueued_at")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(QueueMessage {
            message_id: entry.id.clone(),
            request_id,
            payload,
            enqueued_at,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Malformed message: {0}")]
    Malformed(String),
}
