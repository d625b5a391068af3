/// Execution Orchestrator - One Job, End to End
///
/// **Responsibility:**
/// Compose the sandbox adapter, the deadline race, the output parser and
/// the result sink for a single job: validate, resolve the test-case set,
/// build and start the sandbox, race it against the deadline, turn its
/// output into a verdict, and write the result.
///
/// **Propagation boundary:**
/// Nothing is re-raised to the caller; the queue consumer has no reply
/// channel. Malformed jobs are dropped with a structured warning, teardown
/// failures are swallowed, and parse/persist failures are logged loudly but
/// leave the submission non-terminal (no retry).
use crate::evaluator;
use crate::race::{race, DeadlinePolicy, RaceOutcome};
use crate::sandbox::{SandboxAdapter, SandboxError};
use crate::sink::{ProblemStore, ResultSink};
use gavel_common::types::{
    ExecutionJob, ExecutionResult, ExecutionStatus, Language, OutputPayload, TestCase,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Explicitly constructed collaborators, injected rather than reached for
/// globally so tests can substitute fakes.
pub struct WorkerDeps {
    pub adapter: Arc<dyn SandboxAdapter>,
    pub problems: Arc<dyn ProblemStore>,
    pub sink: Arc<dyn ResultSink>,
    pub deadlines: DeadlinePolicy,
}

/// Why a job was dropped without a result. Surfaced through the tracing
/// warning only; the delivery channel is fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    MalformedJob,
    UnknownProblem,
    UnknownSubmission,
    Internal,
}

impl DropReason {
    fn as_str(&self) -> &'static str {
        match self {
            DropReason::MalformedJob => "malformed_job",
            DropReason::UnknownProblem => "unknown_problem",
            DropReason::UnknownSubmission => "unknown_submission",
            DropReason::Internal => "internal_failure",
        }
    }
}

/// What happened to one delivery, for the worker loop's log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Dropped(DropReason),
    UnsupportedLanguage,
    TimedOut,
    Completed { passed: u32, total: u32 },
    /// Parsing or persistence failed after a successful run; the submission
    /// is left in its non-terminal status.
    Faulted,
}

/// Run one job to a terminal outcome. Single attempt; never panics or
/// returns an error to the caller.
pub async fn execute(job: ExecutionJob, deps: &WorkerDeps) -> JobOutcome {
    if !job.is_well_formed() {
        return drop_job(&job, DropReason::MalformedJob);
    }

    let test_cases = match resolve_test_cases(&job, deps).await {
        Ok(Some(cases)) => cases,
        Ok(None) => return drop_job(&job, DropReason::UnknownProblem),
        Err(e) => {
            error!(submission_id = %job.submission_id, error = %e, "test case lookup failed");
            return drop_job(&job, DropReason::Internal);
        }
    };

    // A permanent job must reference a submission record created at queue
    // time; temporary runs carry a generated id with no backing record.
    if !job.temp {
        match deps.sink.submission_exists(&job.submission_id).await {
            Ok(true) => {}
            Ok(false) => return drop_job(&job, DropReason::UnknownSubmission),
            Err(e) => {
                error!(submission_id = %job.submission_id, error = %e, "submission lookup failed");
                return drop_job(&job, DropReason::Internal);
            }
        }
    }

    let total = test_cases.len() as u32;

    let Some(language) = Language::parse(&job.language) else {
        return reject_language(&job, total, deps).await;
    };

    let inputs: Vec<String> = test_cases.iter().map(|case| case.input.clone()).collect();
    let sandbox = match deps.adapter.build(language, &job.code, &inputs).await {
        Ok(sandbox) => sandbox,
        Err(SandboxError::UnsupportedLanguage(_)) => {
            return reject_language(&job, total, deps).await;
        }
        Err(e) => {
            error!(submission_id = %job.submission_id, error = %e, "sandbox build failed");
            return drop_job(&job, DropReason::Internal);
        }
    };

    if let Err(e) = sandbox.start().await {
        error!(submission_id = %job.submission_id, error = %e, "sandbox start failed");
        sandbox.terminate().await;
        sandbox.release().await;
        return drop_job(&job, DropReason::Internal);
    }

    let deadline = deps.deadlines.deadline_for(language);
    let outcome = match race(sandbox.as_ref(), deadline).await {
        RaceOutcome::TimedOut => {
            // The race already killed and released the sandbox.
            let result = ExecutionResult {
                status: ExecutionStatus::TimeLimitExceeded,
                success: Some(false),
                output: None,
                exec_time_ms: None,
                passed_test_cases: 0,
                total_test_cases: total,
                interview_id: job.interview_id.clone(),
            };
            if let Err(e) = persist(&job, &result, deps).await {
                error!(
                    submission_id = %job.submission_id,
                    error = %e,
                    "timeout result not persisted; submission left non-terminal"
                );
            }
            JobOutcome::TimedOut
        }
        RaceOutcome::Completed => {
            match finish(&job, sandbox.as_ref(), &test_cases, deps).await {
                Ok(passed) => JobOutcome::Completed { passed, total },
                Err(e) => {
                    error!(
                        submission_id = %job.submission_id,
                        error = %e,
                        "parse/persist failed; submission left non-terminal"
                    );
                    JobOutcome::Faulted
                }
            }
        }
    };

    // Covers the Completed path; a no-op after the timeout teardown.
    sandbox.release().await;

    outcome
}

/// Resolve which test cases this job runs: the ad hoc custom case for a
/// temporary run that carries one, otherwise the problem's stored cases
/// (non-hidden only when temporary). The problem must exist either way;
/// a custom input replaces its cases, not the problem itself.
async fn resolve_test_cases(
    job: &ExecutionJob,
    deps: &WorkerDeps,
) -> anyhow::Result<Option<Vec<TestCase>>> {
    let Some(stored) = deps
        .problems
        .load_test_cases(&job.problem_statement_id, job.temp)
        .await?
    else {
        return Ok(None);
    };

    if job.temp && job.contains_test_case {
        if let Some(input) = job.testcase.as_ref().filter(|t| !t.trim().is_empty()) {
            return Ok(Some(vec![TestCase {
                input: input.clone(),
                expected_output: None,
                hidden: false,
            }]));
        }
    }

    Ok(Some(stored))
}

/// Completed path: read the combined output, evaluate it, persist.
async fn finish(
    job: &ExecutionJob,
    sandbox: &dyn crate::sandbox::Sandbox,
    test_cases: &[TestCase],
    deps: &WorkerDeps,
) -> anyhow::Result<u32> {
    let raw_output = sandbox.read_combined_output().await?;
    let verdict = evaluator::evaluate(&raw_output, test_cases);

    match verdict.exec_time_ms {
        Some(ms) => info!(submission_id = %job.submission_id, exec_time_ms = ms, "executed"),
        None => info!(submission_id = %job.submission_id, "executed"),
    }

    let total = test_cases.len() as u32;
    let passed = verdict.passed_count as u32;

    let result = ExecutionResult {
        status: ExecutionStatus::Executed,
        // success is only meaningful for graded, permanent submissions.
        success: if job.temp { None } else { Some(passed == total) },
        output: Some(if job.temp {
            OutputPayload::PerCase(verdict.display_segments)
        } else {
            OutputPayload::Raw(verdict.raw_output)
        }),
        exec_time_ms: verdict.exec_time_ms,
        passed_test_cases: passed,
        total_test_cases: total,
        interview_id: job.interview_id.clone(),
    };

    persist(job, &result, deps).await?;
    Ok(passed)
}

/// A language outside the supported set is a persisted terminal state, not
/// a silent drop: the submitter can see it and nothing is left dangling.
async fn reject_language(job: &ExecutionJob, total: u32, deps: &WorkerDeps) -> JobOutcome {
    warn!(
        submission_id = %job.submission_id,
        language = %job.language,
        "unsupported language"
    );

    let result = ExecutionResult {
        status: ExecutionStatus::UnsupportedLanguage,
        success: Some(false),
        output: None,
        exec_time_ms: None,
        passed_test_cases: 0,
        total_test_cases: total,
        interview_id: job.interview_id.clone(),
    };

    if let Err(e) = persist(job, &result, deps).await {
        error!(submission_id = %job.submission_id, error = %e, "rejection not persisted");
    }

    JobOutcome::UnsupportedLanguage
}

async fn persist(
    job: &ExecutionJob,
    result: &ExecutionResult,
    deps: &WorkerDeps,
) -> anyhow::Result<()> {
    if job.temp {
        deps.sink.merge_temp(&job.submission_id, result).await
    } else {
        deps.sink.persist_submission(&job.submission_id, result).await
    }
}

/// The observability hook for the fire-and-forget boundary: dropped jobs
/// leave a structured warning instead of a result.
fn drop_job(job: &ExecutionJob, reason: DropReason) -> JobOutcome {
    warn!(
        reason = reason.as_str(),
        submission_id = %job.submission_id,
        problem_statement_id = %job.problem_statement_id,
        temp = job.temp,
        "dropping job without a result"
    );
    JobOutcome::Dropped(reason)
}
