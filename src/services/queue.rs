use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use redis::{AsyncCommands, Script};
use uuid::Uuid;

use crate::models::job::{Job, JobState};

/// Pop the oldest pending id and move its record waiting -> active. The pop,
/// the state check, and the claim write happen in one server-side script, so
/// no two workers can observe the same job as claimable.
const CLAIM_SCRIPT: &str = r#"
local id = redis.call('RPOP', KEYS[1])
if not id then
  return nil
end
local job = ARGV[1] .. id
local state = redis.call('HGET', job, 'state')
if state ~= 'waiting' then
  return {id, state or 'missing'}
end
redis.call('HSET', job, 'state', 'active', 'started_at', ARGV[2], 'claim_token', ARGV[3])
redis.call('HINCRBY', job, 'attempts', 1)
redis.call('LPUSH', KEYS[2], id)
return {id, 'active'}
"#;

/// active -> completed, fenced on the claim token: a writer holding a stale
/// token is a no-op.
const COMPLETE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'state') ~= 'active' then
  return 0
end
if redis.call('HGET', KEYS[1], 'claim_token') ~= ARGV[1] then
  return 0
end
redis.call('HSET', KEYS[1], 'state', 'completed', 'finished_at', ARGV[2], 'result', ARGV[3])
redis.call('HDEL', KEYS[1], 'claim_token')
redis.call('LREM', KEYS[2], 1, ARGV[4])
return 1
"#;

/// active -> failed, fenced on the claim token like COMPLETE_SCRIPT.
const FAIL_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'state') ~= 'active' then
  return 0
end
if redis.call('HGET', KEYS[1], 'claim_token') ~= ARGV[1] then
  return 0
end
redis.call('HSET', KEYS[1], 'state', 'failed', 'finished_at', ARGV[2], 'error', ARGV[3])
redis.call('HDEL', KEYS[1], 'claim_token')
redis.call('LREM', KEYS[2], 1, ARGV[4])
return 1
"#;

/// failed -> waiting while attempts remain. The retried id re-enters at the
/// back of the pending order so it never starves newer work.
const RETRY_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'state') ~= 'failed' then
  return 0
end
local attempts = tonumber(redis.call('HGET', KEYS[1], 'attempts') or '0')
if attempts >= tonumber(ARGV[2]) then
  return 0
end
redis.call('HSET', KEYS[1], 'state', 'waiting')
redis.call('HDEL', KEYS[1], 'error', 'started_at', 'finished_at')
redis.call('LPUSH', KEYS[2], ARGV[1])
return 1
"#;

/// Reclaim one active entry whose worker went quiet. Revoking the claim token
/// makes the owner's eventual finishing write lose; the job then takes the
/// retry path or fails terminally once attempts are exhausted.
const REAP_SCRIPT: &str = r#"
local state = redis.call('HGET', KEYS[1], 'state')
if state ~= 'active' then
  redis.call('LREM', KEYS[2], 1, ARGV[1])
  return 'skipped'
end
local started = tonumber(redis.call('HGET', KEYS[1], 'started_at') or '0')
if tonumber(ARGV[2]) - started < tonumber(ARGV[3]) then
  return 'fresh'
end
redis.call('HDEL', KEYS[1], 'claim_token')
redis.call('LREM', KEYS[2], 1, ARGV[1])
local attempts = tonumber(redis.call('HGET', KEYS[1], 'attempts') or '0')
if attempts < tonumber(ARGV[4]) then
  redis.call('HSET', KEYS[1], 'state', 'waiting')
  redis.call('HDEL', KEYS[1], 'started_at', 'finished_at', 'error')
  redis.call('LPUSH', KEYS[3], ARGV[1])
  return 'requeued'
end
redis.call('HSET', KEYS[1], 'state', 'failed', 'error', 'processing timed out', 'finished_at', ARGV[2])
return 'failed'
"#;

/// Outcome of the atomic claim.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// No pending work.
    Empty,
    /// Job moved waiting -> active; the token fences its finishing write.
    Claimed { id: Uuid, token: Uuid },
    /// The popped id did not reference a `waiting` record.
    NotClaimable { id: String, state: String },
}

/// Outcome of reaping one entry from the active list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    /// Still within its processing window.
    Fresh,
    /// Timed out; sent back to waiting for another attempt.
    Requeued,
    /// Timed out with no attempts left; terminally failed.
    Failed,
    /// Entry no longer referenced an active record.
    Skipped,
}

/// Redis-backed durable store for job records and the pending work order.
///
/// Layout: one hash per job (`{prefix}:job:{id}`), a pending list holding
/// claimable ids in FIFO order, and an active list scanned by the staleness
/// sweep. All multi-step transitions run as server-side scripts.
pub struct QueueStore {
    client: redis::Client,
    prefix: String,
    claim: Script,
    complete: Script,
    fail: Script,
    retry: Script,
    reap: Script,
}

impl QueueStore {
    pub fn new(redis_url: &str, prefix: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(StoreError::Redis)?;
        Ok(Self {
            client,
            prefix: prefix.to_string(),
            claim: Script::new(CLAIM_SCRIPT),
            complete: Script::new(COMPLETE_SCRIPT),
            fail: Script::new(FAIL_SCRIPT),
            retry: Script::new(RETRY_SCRIPT),
            reap: Script::new(REAP_SCRIPT),
        })
    }

    fn job_key(&self, id: &str) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    fn job_key_prefix(&self) -> String {
        format!("{}:job:", self.prefix)
    }

    fn pending_key(&self) -> String {
        format!("{}:pending", self.prefix)
    }

    fn active_key(&self) -> String {
        format!("{}:active", self.prefix)
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::Redis)
    }

    /// Persist a new `waiting` record and append its id to the pending order.
    /// Record and work item are written in one MULTI/EXEC pair.
    pub async fn put_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let id = job.id.to_string();
        let fields = initial_fields(job);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(self.job_key(&id), &fields)
            .ignore()
            .lpush(self.pending_key(), &id)
            .ignore();
        pipe.query_async::<()>(&mut conn).await.map_err(StoreError::Redis)?;
        Ok(())
    }

    /// Load a job record, or None if the identifier is unknown.
    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let mut conn = self.conn().await?;
        let map: HashMap<String, String> = conn
            .hgetall(self.job_key(&id.to_string()))
            .await
            .map_err(StoreError::Redis)?;

        if map.is_empty() {
            return Ok(None);
        }
        job_from_hash(id, &map).map(Some)
    }

    /// Atomically pop the next claimable job and mark it active.
    pub async fn claim_next(
        &self,
        now: DateTime<Utc>,
        token: Uuid,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut conn = self.conn().await?;
        let popped: Option<(String, String)> = self
            .claim
            .key(self.pending_key())
            .key(self.active_key())
            .arg(self.job_key_prefix())
            .arg(now.timestamp_millis())
            .arg(token.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(StoreError::Redis)?;

        match popped {
            None => Ok(ClaimOutcome::Empty),
            Some((id, state)) if state == "active" => {
                let id = Uuid::parse_str(&id)
                    .map_err(|_| StoreError::Record(format!("bad job id in queue: {id}")))?;
                Ok(ClaimOutcome::Claimed { id, token })
            }
            Some((id, state)) => Ok(ClaimOutcome::NotClaimable { id, state }),
        }
    }

    /// Record a result (active -> completed). Returns false if the claim
    /// token was stale and the write was discarded.
    pub async fn complete(
        &self,
        id: Uuid,
        token: Uuid,
        result_json: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let id = id.to_string();
        self.complete
            .key(self.job_key(&id))
            .key(self.active_key())
            .arg(token.to_string())
            .arg(now.timestamp_millis())
            .arg(result_json)
            .arg(&id)
            .invoke_async(&mut conn)
            .await
            .map_err(StoreError::Redis)
    }

    /// Record a failure (active -> failed). Returns false if the claim token
    /// was stale and the write was discarded.
    pub async fn fail(
        &self,
        id: Uuid,
        token: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let id = id.to_string();
        self.fail
            .key(self.job_key(&id))
            .key(self.active_key())
            .arg(token.to_string())
            .arg(now.timestamp_millis())
            .arg(error)
            .arg(&id)
            .invoke_async(&mut conn)
            .await
            .map_err(StoreError::Redis)
    }

    /// failed -> waiting if attempts remain. Returns false when the job is
    /// not failed or the attempt budget is exhausted.
    pub async fn retry(&self, id: Uuid, max_attempts: u32) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let id = id.to_string();
        self.retry
            .key(self.job_key(&id))
            .key(self.pending_key())
            .arg(&id)
            .arg(max_attempts)
            .invoke_async(&mut conn)
            .await
            .map_err(StoreError::Redis)
    }

    /// Ids currently on the active list (claimed, not yet finished).
    pub async fn active_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        conn.lrange(self.active_key(), 0, -1)
            .await
            .map_err(StoreError::Redis)
    }

    /// Reap one active entry if its processing window has elapsed.
    pub async fn reap(
        &self,
        id: &str,
        now: DateTime<Utc>,
        timeout_ms: i64,
        max_attempts: u32,
    ) -> Result<ReapOutcome, StoreError> {
        let mut conn = self.conn().await?;
        let status: String = self
            .reap
            .key(self.job_key(id))
            .key(self.active_key())
            .key(self.pending_key())
            .arg(id)
            .arg(now.timestamp_millis())
            .arg(timeout_ms)
            .arg(max_attempts)
            .invoke_async(&mut conn)
            .await
            .map_err(StoreError::Redis)?;

        match status.as_str() {
            "fresh" => Ok(ReapOutcome::Fresh),
            "requeued" => Ok(ReapOutcome::Requeued),
            "failed" => Ok(ReapOutcome::Failed),
            "skipped" => Ok(ReapOutcome::Skipped),
            other => Err(StoreError::Record(format!("unexpected reap status: {other}"))),
        }
    }

    /// Current number of pending jobs.
    pub async fn queue_depth(&self) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;
        conn.llen(self.pending_key()).await.map_err(StoreError::Redis)
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(StoreError::Redis)?;
        Ok(())
    }
}

/// Hash fields written when a job record is first persisted.
fn initial_fields(job: &Job) -> Vec<(&'static str, String)> {
    vec![
        ("state", job.state.to_string()),
        ("payload", job.payload.clone()),
        ("attempts", job.attempts.to_string()),
        ("created_at", job.created_at.timestamp_millis().to_string()),
    ]
}

/// Rebuild a job record from its Redis hash.
fn job_from_hash(id: Uuid, map: &HashMap<String, String>) -> Result<Job, StoreError> {
    let state = map
        .get("state")
        .ok_or_else(|| StoreError::Record(format!("job {id} has no state field")))?
        .parse::<JobState>()
        .map_err(|_| StoreError::Record(format!("job {id} has an unrecognized state")))?;

    let payload = map
        .get("payload")
        .cloned()
        .ok_or_else(|| StoreError::Record(format!("job {id} has no payload field")))?;

    let attempts = match map.get("attempts") {
        Some(raw) => raw
            .parse()
            .map_err(|_| StoreError::Record(format!("job {id} has a bad attempts field")))?,
        None => 0,
    };

    let created_at = parse_millis(id, map.get("created_at"))?
        .ok_or_else(|| StoreError::Record(format!("job {id} has no created_at field")))?;

    let result = map
        .get("result")
        .map(|raw| serde_json::from_str(raw))
        .transpose()
        .map_err(StoreError::Serialize)?;

    Ok(Job {
        id,
        state,
        payload,
        attempts,
        created_at,
        started_at: parse_millis(id, map.get("started_at"))?,
        finished_at: parse_millis(id, map.get("finished_at"))?,
        result,
        error: map.get("error").cloned(),
    })
}

fn parse_millis(
    id: Uuid,
    raw: Option<&String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let ms: i64 = raw
        .parse()
        .map_err(|_| StoreError::Record(format!("job {id} has a bad timestamp: {raw}")))?;
    let ts = Utc
        .timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Record(format!("job {id} has an out-of-range timestamp")))?;
    Ok(Some(ts))
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Malformed job record: {0}")]
    Record(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_fields_round_trip() {
        let job = Job::new("payload-bytes".to_string());
        let map: HashMap<String, String> = initial_fields(&job)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let parsed = job_from_hash(job.id, &map).unwrap();
        assert_eq!(parsed.state, JobState::Waiting);
        assert_eq!(parsed.payload, "payload-bytes");
        assert_eq!(parsed.attempts, 0);
        assert_eq!(
            parsed.created_at.timestamp_millis(),
            job.created_at.timestamp_millis()
        );
        assert!(parsed.started_at.is_none());
        assert!(parsed.result.is_none());
        assert!(parsed.error.is_none());
    }

    #[test]
    fn test_hash_with_result_and_timestamps() {
        let id = Uuid::new_v4();
        let mut map = HashMap::new();
        map.insert("state".to_string(), "completed".to_string());
        map.insert("payload".to_string(), "img".to_string());
        map.insert("attempts".to_string(), "1".to_string());
        map.insert("created_at".to_string(), "1700000000000".to_string());
        map.insert("started_at".to_string(), "1700000001000".to_string());
        map.insert("finished_at".to_string(), "1700000002000".to_string());
        map.insert("result".to_string(), r#"{"score":0.9}"#.to_string());

        let job = job_from_hash(id, &map).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.result, Some(serde_json::json!({ "score": 0.9 })));
        assert!(job.started_at.unwrap() < job.finished_at.unwrap());
    }

    #[test]
    fn test_missing_state_is_rejected() {
        let id = Uuid::new_v4();
        let mut map = HashMap::new();
        map.insert("payload".to_string(), "img".to_string());
        assert!(matches!(
            job_from_hash(id, &map),
            Err(StoreError::Record(_))
        ));
    }

    #[test]
    fn test_unknown_state_is_rejected() {
        let id = Uuid::new_v4();
        let mut map = HashMap::new();
        map.insert("state".to_string(), "enqueued".to_string());
        map.insert("payload".to_string(), "img".to_string());
        map.insert("created_at".to_string(), "1700000000000".to_string());
        assert!(matches!(
            job_from_hash(id, &map),
            Err(StoreError::Record(_))
        ));
    }
}
