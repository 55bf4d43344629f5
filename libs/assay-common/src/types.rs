use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Languages the sandbox may be asked to run.
///
/// Whether a language is actually runnable is decided by `config/languages.json`;
/// this enum only fixes the set of tags the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "python")]
    Python,
    #[serde(rename = "javascript")]
    JavaScript,
    #[serde(rename = "java")]
    Java,
}

impl Language {
    /// Parse a declared language tag, case-insensitively.
    pub fn from_str(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "python" | "python3" | "py" => Some(Language::Python),
            "javascript" | "js" | "node" => Some(Language::JavaScript),
            "java" => Some(Language::Java),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Java => "java",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    #[serde(alias = "mcq")]
    ExactChoice,
    #[serde(alias = "subjective")]
    FreeText,
    #[serde(alias = "coding")]
    Code,
}

impl QuestionType {
    /// Section name used as the key of `EvaluationResult::section_scores`
    pub fn section(&self) -> &'static str {
        match self {
            QuestionType::ExactChoice => "exact_choice",
            QuestionType::FreeText => "free_text",
            QuestionType::Code => "code",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub index: u32,
    pub input: String,
    pub expected_output: String,
    /// Hidden cases are withheld from the candidate view by the API layer.
    #[serde(default)]
    pub hidden: bool,
}

/// Per-type scoring parameters of a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScoringParams {
    #[serde(alias = "mcq")]
    ExactChoice {
        correct_answer: String,
        #[serde(default)]
        options: Vec<String>,
    },
    #[serde(alias = "subjective")]
    FreeText {
        #[serde(default)]
        rubric: Option<serde_json::Value>,
        #[serde(default)]
        expected_points: Vec<String>,
    },
    #[serde(alias = "coding")]
    Code {
        test_cases: Vec<TestCase>,
    },
}

fn default_weight() -> f64 {
    1.0
}

/// An issued assessment question. Immutable once the assessment is issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub max_points: f64,
    #[serde(default)]
    pub skill: String,
    /// Weight of this question in skill and section rollups.
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(flatten)]
    pub scoring: ScoringParams,
}

impl Question {
    pub fn question_type(&self) -> QuestionType {
        match self.scoring {
            ScoringParams::ExactChoice { .. } => QuestionType::ExactChoice,
            ScoringParams::FreeText { .. } => QuestionType::FreeText,
            ScoringParams::Code { .. } => QuestionType::Code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: String,
    pub content: String,
    /// Declared language, only meaningful for code answers.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub elapsed_seconds: Option<f64>,
}

/// Why a test case did not pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    WrongAnswer,
    TimeLimitExceeded,
    RuntimeError,
    UnsupportedLanguage,
    InputRejected,
    EmptySubmission,
    SandboxFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub index: u32,
    pub passed: bool,
    pub stdout: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_time_ms: u64,
}

impl ExecutionOutcome {
    pub fn passed(index: u32, stdout: String, execution_time_ms: u64) -> Self {
        Self {
            index,
            passed: true,
            stdout,
            failure: None,
            error: None,
            execution_time_ms,
        }
    }

    pub fn failed(index: u32, kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            index,
            passed: false,
            stdout: String::new(),
            failure: Some(kind),
            error: Some(error.into()),
            execution_time_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    Plagiarism,
    TimingAnomaly,
    BotPattern,
    RandomGuess,
    CopyPaste,
    ResumeMismatch,
}

/// Flag severity. Variant order is the severity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_str(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheatFlag {
    #[serde(rename = "flag_type")]
    pub kind: FlagKind,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub evidence: BTreeMap<String, serde_json::Value>,
    pub confidence: f64,
}

impl CheatFlag {
    pub fn new(kind: FlagKind, severity: Severity, description: impl Into<String>, confidence: f64) -> Self {
        Self {
            kind,
            severity,
            description: description.into(),
            evidence: BTreeMap::new(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn with_evidence(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.evidence.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Evaluated,
    Error,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_id: String,
    pub question_type: QuestionType,
    pub skill: String,
    pub score: f64,
    pub max_score: f64,
    pub status: QuestionStatus,
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_results: Vec<ExecutionOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub candidate_id: String,
    pub assessment_id: String,
    pub results: Vec<QuestionResult>,
    pub total_score: f64,
    pub max_total_score: f64,
    pub percentage: f64,
    pub skill_scores: BTreeMap<String, f64>,
    pub section_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub overall_feedback: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Clear,
    Review,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub candidate_id: String,
    pub assessment_id: String,
    pub flags: Vec<CheatFlag>,
    pub resume_match_score: Option<f64>,
    pub plagiarism_score: f64,
    pub timing_anomaly_score: f64,
    pub integrity_score: f64,
    pub is_flagged: bool,
    pub recommendation: Recommendation,
    pub summary: String,
}

/// One candidate submission queued for evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationJob {
    pub id: Uuid,
    pub candidate_id: String,
    pub assessment_id: String,
    pub questions: Vec<Question>,
    pub answers: Vec<Answer>,
    #[serde(default)]
    pub resume_text: Option<String>,
    /// Code submitted by other candidates of the same assessment, keyed by candidate id.
    #[serde(default)]
    pub peer_submissions: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Completed,
    /// The worker gave up on the job; no report will follow
    Failed,
}

/// What the worker persists for a finished job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReport {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub evaluation: EvaluationResult,
    pub integrity: IntegrityReport,
    pub completed_at: DateTime<Utc>,
}
