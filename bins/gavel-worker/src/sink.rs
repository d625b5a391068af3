/// Result Sink & Problem Store - External Collaborator Seams
///
/// The orchestrator only ever talks to these traits; production wires in
/// the Redis-backed implementations below, tests substitute fakes. No
/// process-wide singletons.
use anyhow::{Context, Result};
use async_trait::async_trait;
use gavel_common::redis::{
    problem_test_cases_key, result_key, temp_key, RESULT_TTL_SECS, TEMP_RESULT_TTL_SECS,
};
use gavel_common::types::{ExecutionResult, TestCase};
use redis::AsyncCommands;

/// Persists a job's terminal (or timeout) result.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Whether a permanent submission record exists for this id. Jobs
    /// referencing an unknown submission are dropped upstream.
    async fn submission_exists(&self, submission_id: &str) -> Result<bool>;

    /// Terminal write for a permanent submission.
    async fn persist_submission(&self, submission_id: &str, result: &ExecutionResult)
        -> Result<()>;

    /// Merge-write into a temporary run's cached record. Every write
    /// refreshes the record's TTL; the producer's Queued placeholder fields
    /// survive the merge.
    async fn merge_temp(&self, submission_id: &str, result: &ExecutionResult) -> Result<()>;
}

/// Loads a problem's stored test cases.
#[async_trait]
pub trait ProblemStore: Send + Sync {
    /// `visible_only` restricts to non-hidden cases (temporary runs never
    /// see hidden ones). `None` means the problem does not exist.
    async fn load_test_cases(
        &self,
        problem_id: &str,
        visible_only: bool,
    ) -> Result<Option<Vec<TestCase>>>;
}

/// Overlay `update`'s fields onto `prev`. Non-object inputs are replaced
/// wholesale.
fn merge_json(prev: serde_json::Value, update: serde_json::Value) -> serde_json::Value {
    match (prev, update) {
        (serde_json::Value::Object(mut base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                base.insert(key, value);
            }
            serde_json::Value::Object(base)
        }
        (_, update) => update,
    }
}

#[derive(Clone)]
pub struct RedisResultSink {
    conn: redis::aio::ConnectionManager,
}

impl RedisResultSink {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        RedisResultSink { conn }
    }

    async fn merge_write(&self, key: &str, result: &ExecutionResult, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();

        let prev: Option<String> = conn.get(key).await?;
        let prev_value = prev
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| serde_json::json!({}));

        let update = serde_json::to_value(result).context("serialize result")?;
        let merged = merge_json(prev_value, update);

        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(merged.to_string())
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ResultSink for RedisResultSink {
    async fn submission_exists(&self, submission_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(result_key(submission_id)).await?;
        Ok(exists)
    }

    async fn persist_submission(
        &self,
        submission_id: &str,
        result: &ExecutionResult,
    ) -> Result<()> {
        self.merge_write(&result_key(submission_id), result, RESULT_TTL_SECS)
            .await
    }

    async fn merge_temp(&self, submission_id: &str, result: &ExecutionResult) -> Result<()> {
        self.merge_write(&temp_key(submission_id), result, TEMP_RESULT_TTL_SECS)
            .await
    }
}

#[derive(Clone)]
pub struct RedisProblemStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisProblemStore {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        RedisProblemStore { conn }
    }
}

#[async_trait]
impl ProblemStore for RedisProblemStore {
    async fn load_test_cases(
        &self,
        problem_id: &str,
        visible_only: bool,
    ) -> Result<Option<Vec<TestCase>>> {
        let mut conn = self.conn.clone();

        let raw: Option<String> = conn.get(problem_test_cases_key(problem_id)).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let mut cases: Vec<TestCase> =
            serde_json::from_str(&raw).context("parse stored test cases")?;
        if visible_only {
            cases.retain(|case| !case.hidden);
        }

        Ok(Some(cases))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    pub(crate) struct FakeSink {
        pub submissions: HashSet<String>,
        pub persisted: Mutex<Vec<(String, ExecutionResult)>>,
        pub temp_merges: Mutex<Vec<(String, ExecutionResult)>>,
        pub fail_writes: bool,
    }

    impl FakeSink {
        pub(crate) fn new(submissions: &[&str]) -> Self {
            FakeSink {
                submissions: submissions.iter().map(|s| s.to_string()).collect(),
                persisted: Mutex::new(Vec::new()),
                temp_merges: Mutex::new(Vec::new()),
                fail_writes: false,
            }
        }

        pub(crate) fn write_count(&self) -> usize {
            self.persisted.lock().unwrap().len() + self.temp_merges.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ResultSink for FakeSink {
        async fn submission_exists(&self, submission_id: &str) -> Result<bool> {
            Ok(self.submissions.contains(submission_id))
        }

        async fn persist_submission(
            &self,
            submission_id: &str,
            result: &ExecutionResult,
        ) -> Result<()> {
            if self.fail_writes {
                anyhow::bail!("store unavailable");
            }
            self.persisted
                .lock()
                .unwrap()
                .push((submission_id.to_string(), result.clone()));
            Ok(())
        }

        async fn merge_temp(&self, submission_id: &str, result: &ExecutionResult) -> Result<()> {
            if self.fail_writes {
                anyhow::bail!("store unavailable");
            }
            self.temp_merges
                .lock()
                .unwrap()
                .push((submission_id.to_string(), result.clone()));
            Ok(())
        }
    }

    pub(crate) struct FakeProblemStore {
        pub problems: HashMap<String, Vec<TestCase>>,
    }

    impl FakeProblemStore {
        pub(crate) fn with_problem(problem_id: &str, cases: Vec<TestCase>) -> Self {
            let mut problems = HashMap::new();
            problems.insert(problem_id.to_string(), cases);
            FakeProblemStore { problems }
        }
    }

    #[async_trait]
    impl ProblemStore for FakeProblemStore {
        async fn load_test_cases(
            &self,
            problem_id: &str,
            visible_only: bool,
        ) -> Result<Option<Vec<TestCase>>> {
            Ok(self.problems.get(problem_id).map(|cases| {
                cases
                    .iter()
                    .filter(|case| !visible_only || !case.hidden)
                    .cloned()
                    .collect()
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel_common::types::{ExecutionStatus, OutputPayload};

    #[test]
    fn test_merge_overlays_fields_and_keeps_the_rest() {
        let prev = serde_json::json!({
            "status": "Queued",
            "code": "print(input())",
            "totalTestCases": 2
        });
        let update = serde_json::json!({
            "status": "Executed",
            "passedTestCases": 2,
            "output": ["6\n", "5\n"]
        });

        let merged = merge_json(prev, update);

        assert_eq!(merged["status"], "Executed");
        assert_eq!(merged["passedTestCases"], 2);
        // Placeholder fields written at queue time must survive.
        assert_eq!(merged["code"], "print(input())");
        assert_eq!(merged["totalTestCases"], 2);
    }

    #[test]
    fn test_merge_with_missing_previous_record() {
        let update = serde_json::json!({"status": "TimeLimitExceeded", "success": false});
        let merged = merge_json(serde_json::json!({}), update.clone());
        assert_eq!(merged, update);
    }

    #[test]
    fn test_result_merges_into_expected_wire_shape() {
        let result = ExecutionResult {
            status: ExecutionStatus::Executed,
            success: None,
            output: Some(OutputPayload::PerCase(vec!["6\n".into()])),
            exec_time_ms: Some(42),
            passed_test_cases: 1,
            total_test_cases: 1,
            interview_id: Some("iv-1".into()),
        };

        let merged = merge_json(
            serde_json::json!({"status": "Queued"}),
            serde_json::to_value(&result).unwrap(),
        );

        assert_eq!(merged["status"], "Executed");
        assert_eq!(merged["output"], serde_json::json!(["6\n"]));
        assert_eq!(merged["execTime"], 42);
        assert_eq!(merged["interviewId"], "iv-1");
        // Temporary Executed writes carry no success flag.
        assert!(merged.get("success").is_none());
    }

    /// Round trip through a real Redis, teacher-style smoke check.
    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_sink_round_trip() {
        let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
        let conn = redis::aio::ConnectionManager::new(client).await.unwrap();
        let sink = RedisResultSink::new(conn);

        let result = ExecutionResult {
            status: ExecutionStatus::Executed,
            success: Some(true),
            output: Some(OutputPayload::Raw("5\n---".into())),
            exec_time_ms: Some(42),
            passed_test_cases: 1,
            total_test_cases: 1,
            interview_id: None,
        };

        sink.persist_submission("sink-test-submission", &result)
            .await
            .unwrap();
        assert!(sink.submission_exists("sink-test-submission").await.unwrap());
    }
}
