use serde::{Deserialize, Serialize};
use std::fmt;

/// Languages with a configured sandbox image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    C,
    Cpp,
    Java,
}

impl Language {
    /// Parse the raw `language` string carried by a job message.
    ///
    /// Jobs keep the language as free text so that an unknown value can be
    /// surfaced as an `UnsupportedLanguage` result instead of failing
    /// deserialization of the whole message.
    pub fn parse(raw: &str) -> Option<Language> {
        match raw.trim().to_lowercase().as_str() {
            "python" => Some(Language::Python),
            "c" => Some(Language::C),
            "cpp" => Some(Language::Cpp),
            "java" => Some(Language::Java),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::Python => "python",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
        };
        write!(f, "{}", name)
    }
}

/// One execution job as delivered by the queue.
///
/// Field names mirror the producer's JSON exactly; the message is contract,
/// not ours to reshape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionJob {
    pub code: String,
    pub language: String,
    pub submission_id: String,
    pub problem_statement_id: String,
    #[serde(default)]
    pub temp: bool,
    #[serde(default)]
    pub testcase: Option<String>,
    #[serde(default)]
    pub contains_test_case: bool,
    #[serde(default)]
    pub interview_id: Option<String>,
}

impl ExecutionJob {
    /// Boundary invariant: `code`, `language` and `problemStatementId` must be
    /// non-empty after trimming, and `submissionId` too unless this is a
    /// temporary run. Jobs failing this are dropped without a result.
    pub fn is_well_formed(&self) -> bool {
        !self.code.trim().is_empty()
            && !self.language.trim().is_empty()
            && !self.problem_statement_id.trim().is_empty()
            && (self.temp || !self.submission_id.trim().is_empty())
    }
}

/// A stored test case for a problem, or the synthetic case built from a
/// custom input on a temporary run (`expected_output` is `None` there and
/// never matches).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    #[serde(rename = "output", default)]
    pub expected_output: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Queued,
    Executing,
    Executed,
    TimeLimitExceeded,
    UnsupportedLanguage,
}

/// Raw program output, in the shape the result store expects: the delimited
/// blob for permanent submissions, a per-test-case array for temporary runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputPayload {
    Raw(String),
    PerCase(Vec<String>),
}

/// Terminal (or timeout) result of one job, written through the result sink.
///
/// `success` is only meaningful for permanent submissions; temporary runs
/// leave it `None` on the Executed path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputPayload>,
    #[serde(rename = "execTime")]
    pub exec_time_ms: Option<u64>,
    pub passed_test_cases: u32,
    pub total_test_cases: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interview_id: Option<String>,
}
