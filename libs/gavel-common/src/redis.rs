use crate::types::ExecutionJob;
use ::redis::{AsyncCommands, RedisResult};

/// Redis key semantics shared by the API producer and the worker.
/// Defined once so the two sides never drift.

pub const EXECUTE_QUEUE: &str = "gavel:queue:execute";
pub const RESULT_PREFIX: &str = "gavel:result";
pub const PROBLEM_PREFIX: &str = "gavel:problem";

/// TTL for temporary ("run") results; refreshed on every write.
pub const TEMP_RESULT_TTL_SECS: u64 = 300;

/// TTL for permanent submission results kept in the hot store.
pub const RESULT_TTL_SECS: u64 = 86400;

/// Key for a permanent submission's result record.
pub fn result_key(submission_id: &str) -> String {
    format!("{}:{}", RESULT_PREFIX, submission_id)
}

/// Key for a temporary run's cached record. The producer seeds this key with
/// a `Queued` placeholder; the worker merge-writes into it.
pub fn temp_key(submission_id: &str) -> String {
    format!("temp-{}", submission_id)
}

/// Key holding a problem's test case list as a JSON array.
pub fn problem_test_cases_key(problem_id: &str) -> String {
    format!("{}:{}:testcases", PROBLEM_PREFIX, problem_id)
}

/// Enqueue a job for execution. RPUSH for FIFO semantics.
pub async fn push_job(
    conn: &mut redis::aio::ConnectionManager,
    job: &ExecutionJob,
) -> RedisResult<()> {
    let payload = serde_json::to_string(job).map_err(|e| {
        redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
    })?;

    conn.rpush(EXECUTE_QUEUE, payload).await
}

/// Pop the next job off the execute queue.
/// Uses BLPOP with a timeout so the worker loop can observe shutdown.
pub async fn pop_job(
    conn: &mut redis::aio::ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<ExecutionJob>> {
    let result: Option<(String, String)> = conn.blpop(EXECUTE_QUEUE, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let job: ExecutionJob = serde_json::from_str(&payload).map_err(|e| {
                redis::RedisError::from((
                    redis::ErrorKind::TypeError,
                    "deserialization error",
                    e.to_string(),
                ))
            })?;
            Ok(Some(job))
        }
        None => Ok(None),
    }
}
