//! Redis Streams queue for asynchronous cache refresh jobs.
//!
//! Stale cache reads enqueue the request path here; a background worker in
//! the API service re-fetches it with the cache bypassed, which repopulates
//! the entry through the normal write path. Last write wins.

use chrono::{DateTime, Utc};
use redis::{aio::MultiplexedConnection, streams::*, AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use maps_common::{MapsError, MapsResult};

const STREAM_KEY: &str = "cache:refresh:jobs";
const CONSUMER_GROUP: &str = "refreshers";

/// Redis Streams queue client for refresh jobs.
pub struct RefreshQueue {
    conn: MultiplexedConnection,
}

impl RefreshQueue {
    /// Connect to Redis and initialize the stream.
    pub async fn connect(redis_url: &str) -> MapsResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| MapsError::QueueError(format!("Redis connection failed: {}", e)))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| MapsError::QueueError(format!("Redis connection failed: {}", e)))?;

        // Create consumer group if it doesn't exist
        let _: Result<(), _> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(STREAM_KEY)
            .arg(CONSUMER_GROUP)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        Ok(Self { conn })
    }

    /// Enqueue a refresh job.
    pub async fn enqueue(&mut self, job: &RefreshJob) -> MapsResult<String> {
        let job_json = serde_json::to_string(job)
            .map_err(|e| MapsError::InternalError(format!("Serialization failed: {}", e)))?;

        let entry_id: String = redis::cmd("XADD")
            .arg(STREAM_KEY)
            .arg("*")
            .arg("job_id")
            .arg(job.id.to_string())
            .arg("data")
            .arg(&job_json)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| MapsError::QueueError(format!("Enqueue failed: {}", e)))?;

        Ok(entry_id)
    }

    /// Claim the next available job, blocking briefly when the stream is
    /// empty. Returns the stream entry id for acknowledgement.
    pub async fn claim_next(
        &mut self,
        consumer_name: &str,
    ) -> MapsResult<Option<(String, RefreshJob)>> {
        let opts = StreamReadOptions::default()
            .group(CONSUMER_GROUP, consumer_name)
            .count(1)
            .block(5000);

        let result: StreamReadReply = self
            .conn
            .xread_options(&[STREAM_KEY], &[">"], &opts)
            .await
            .map_err(|e| MapsError::QueueError(format!("Read failed: {}", e)))?;

        for stream_key in result.keys {
            for entry in stream_key.ids {
                if let Some(data) = entry.map.get("data") {
                    let bytes: Vec<u8> = redis::from_redis_value(data)
                        .map_err(|e| MapsError::InternalError(format!("Parse failed: {}", e)))?;
                    let job: RefreshJob = serde_json::from_slice(&bytes).map_err(|e| {
                        MapsError::InternalError(format!("Deserialize failed: {}", e))
                    })?;
                    return Ok(Some((entry.id, job)));
                }
            }
        }

        Ok(None)
    }

    /// Acknowledge a processed entry.
    pub async fn ack(&mut self, entry_id: &str) -> MapsResult<()> {
        let _: i64 = self
            .conn
            .xack(STREAM_KEY, CONSUMER_GROUP, &[entry_id])
            .await
            .map_err(|e| MapsError::QueueError(format!("Ack failed: {}", e)))?;
        Ok(())
    }

    /// Get queue depth (pending jobs).
    pub async fn queue_depth(&mut self) -> MapsResult<u64> {
        let info: StreamInfoStreamReply = self
            .conn
            .xinfo_stream(STREAM_KEY)
            .await
            .map_err(|e| MapsError::QueueError(format!("XINFO failed: {}", e)))?;

        Ok(info.length as u64)
    }
}

/// A cache refresh request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshJob {
    pub id: Uuid,
    /// Path plus canonical query string to re-fetch with the cache bypassed.
    pub request_path: String,
    pub created_at: DateTime<Utc>,
}

impl RefreshJob {
    pub fn new(request_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_path: request_path.into(),
            created_at: Utc::now(),
        }
    }
}
