// HTTP route handlers for the Assay API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use assay_common::redis;
use assay_common::types::{Answer, EvaluationJob, JobStatus, Question, ScoringParams};
use assay_integrity::fingerprint::{self, NUM_PERMUTATIONS, SHINGLE_SIZE};
use assay_integrity::plagiarism;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::extract::ApiJson;
use crate::metrics;
use crate::AppState;

/// Fingerprint requests above this size are refused
pub const MAX_FINGERPRINT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub candidate_id: String,
    pub assessment_id: String,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub answers: Vec<Answer>,
    #[serde(default)]
    pub resume_text: Option<String>,
    #[serde(default)]
    pub peer_submissions: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct FingerprintRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct FingerprintResponse {
    pub slots: Vec<u64>,
    pub num_permutations: usize,
    pub shingle_size: usize,
    pub degenerate: bool,
}

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub left: String,
    pub right: String,
}

#[derive(Debug, Serialize)]
pub struct CompareResponse {
    pub minhash_similarity: f64,
    pub edit_ratio: Option<f64>,
    pub similarity: f64,
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Structural checks the worker relies on. Content is never judged here.
pub fn validate(request: &EvaluateRequest) -> Result<(), String> {
    if request.candidate_id.trim().is_empty() {
        return Err("candidate_id must not be empty".to_string());
    }
    if request.assessment_id.trim().is_empty() {
        return Err("assessment_id must not be empty".to_string());
    }
    if request.questions.is_empty() {
        return Err("at least one question is required".to_string());
    }

    let mut seen = HashSet::new();
    for question in &request.questions {
        if !seen.insert(question.id.as_str()) {
            return Err(format!("duplicate question id '{}'", question.id));
        }
        if !question.max_points.is_finite() || question.max_points < 0.0 {
            return Err(format!("question '{}' has invalid max_points", question.id));
        }
        if !question.weight.is_finite() || question.weight < 0.0 {
            return Err(format!("question '{}' has invalid weight", question.id));
        }
        if let ScoringParams::Code { test_cases } = &question.scoring {
            if test_cases.is_empty() {
                return Err(format!("code question '{}' has no test cases", question.id));
            }
        }
    }

    if let Some(answer) = request
        .answers
        .iter()
        .find(|a| a.elapsed_seconds.map_or(false, |t| !t.is_finite() || t < 0.0))
    {
        return Err(format!("answer to '{}' has invalid elapsed_seconds", answer.question_id));
    }

    Ok(())
}

/// POST /evaluate - Queue a submission for evaluation
pub async fn submit_evaluation(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<EvaluateRequest>,
) -> Response {
    if let Err(reason) = validate(&payload) {
        metrics::JOBS_REJECTED.inc();
        warn!(candidate_id = %payload.candidate_id, reason = %reason, "Evaluation request rejected");
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, reason);
    }

    let job = EvaluationJob {
        id: Uuid::new_v4(),
        candidate_id: payload.candidate_id,
        assessment_id: payload.assessment_id,
        questions: payload.questions,
        answers: payload.answers,
        resume_text: payload.resume_text,
        peer_submissions: payload.peer_submissions,
    };

    let mut conn = state.redis.clone();
    if let Err(e) = redis::set_status(&mut conn, &job.id, JobStatus::Pending).await {
        error!(job_id = %job.id, error = %e, "Failed to record job status");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to queue job: {}", e));
    }

    match redis::push_job(&mut conn, &job).await {
        Ok(()) => {
            metrics::JOBS_QUEUED.inc();
            info!(
                job_id = %job.id,
                candidate_id = %job.candidate_id,
                questions = job.questions.len(),
                answers = job.answers.len(),
                "Job queued"
            );
            (
                StatusCode::CREATED,
                Json(EvaluateResponse {
                    job_id: job.id.to_string(),
                    status: JobStatus::Pending,
                    queued_at: Utc::now(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(job_id = %job.id, error = %e, "Failed to queue job");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to queue job: {}", e))
        }
    }
}

/// GET /evaluation/:job_id - Fetch a finished report, or the pending status
pub async fn get_evaluation(State(state): State<Arc<AppState>>, Path(job_id): Path<String>) -> Response {
    let job_uuid = match Uuid::parse_str(&job_id) {
        Ok(id) => id,
        Err(_) => {
            metrics::RESULT_LOOKUPS.with_label_values(&["invalid"]).inc();
            return error_response(StatusCode::BAD_REQUEST, "Invalid job ID format");
        }
    };

    let mut conn = state.redis.clone();
    match redis::get_report(&mut conn, &job_uuid).await {
        Ok(Some(report)) => {
            metrics::RESULT_LOOKUPS.with_label_values(&["completed"]).inc();
            info!(job_id = %job_id, "Evaluation report retrieved");
            return (StatusCode::OK, Json(report)).into_response();
        }
        Ok(None) => {}
        Err(e) => {
            metrics::RESULT_LOOKUPS.with_label_values(&["error"]).inc();
            error!(job_id = %job_id, error = %e, "Failed to fetch evaluation report");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to query job status: {}", e),
            );
        }
    }

    match redis::get_status(&mut conn, &job_uuid).await {
        Ok(Some(JobStatus::Failed)) => {
            metrics::RESULT_LOOKUPS.with_label_values(&["failed"]).inc();
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Evaluation failed; resubmit the job")
        }
        Ok(Some(status)) => {
            metrics::RESULT_LOOKUPS.with_label_values(&["pending"]).inc();
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "job_id": job_id,
                    "status": status,
                    "message": "Job is queued or still evaluating"
                })),
            )
                .into_response()
        }
        Ok(None) => {
            metrics::RESULT_LOOKUPS.with_label_values(&["unknown"]).inc();
            error_response(StatusCode::NOT_FOUND, "Unknown or expired job")
        }
        Err(e) => {
            metrics::RESULT_LOOKUPS.with_label_values(&["error"]).inc();
            error!(job_id = %job_id, error = %e, "Failed to fetch job status");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to query job status: {}", e),
            )
        }
    }
}

/// POST /fingerprint - MinHash sketch of raw code, for client-side pre-submission hashing
pub async fn fingerprint(ApiJson(payload): ApiJson<FingerprintRequest>) -> Response {
    metrics::FINGERPRINT_REQUESTS.with_label_values(&["sketch"]).inc();
    if payload.code.len() > MAX_FINGERPRINT_BYTES {
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Code exceeds maximum size of {} bytes", MAX_FINGERPRINT_BYTES),
        );
    }

    let sketch = fingerprint::sketch(&payload.code);
    let degenerate = sketch.is_degenerate();
    (
        StatusCode::OK,
        Json(FingerprintResponse {
            slots: sketch.slots,
            num_permutations: NUM_PERMUTATIONS,
            shingle_size: SHINGLE_SIZE,
            degenerate,
        }),
    )
        .into_response()
}

/// POST /fingerprint/compare - Both similarity measures for two code texts
pub async fn compare(ApiJson(payload): ApiJson<CompareRequest>) -> Response {
    metrics::FINGERPRINT_REQUESTS.with_label_values(&["compare"]).inc();
    if payload.left.len() > MAX_FINGERPRINT_BYTES || payload.right.len() > MAX_FINGERPRINT_BYTES {
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Code exceeds maximum size of {} bytes", MAX_FINGERPRINT_BYTES),
        );
    }

    // The edit ratio is CPU-bound; keep it off the async workers
    let pair = match tokio::task::spawn_blocking(move || plagiarism::compare(&payload.left, &payload.right)).await {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "Comparison task failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Comparison failed");
        }
    };
    (
        StatusCode::OK,
        Json(CompareResponse {
            minhash_similarity: pair.minhash,
            edit_ratio: pair.edit_ratio,
            similarity: pair.score(),
        }),
    )
        .into_response()
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus exposition
pub async fn metrics_endpoint() -> Response {
    match metrics::render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assay_common::types::TestCase;
    use axum::body::to_bytes;
    use serde_json::Value;

    fn request() -> EvaluateRequest {
        serde_json::from_value(serde_json::json!({
            "candidate_id": "cand-a",
            "assessment_id": "asmt-1",
            "questions": [
                {"id": "q1", "type": "mcq", "prompt": "Pick", "max_points": 2, "skill": "SQL", "correct_answer": "B"},
                {"id": "q2", "type": "coding", "prompt": "Echo", "max_points": 10, "skill": "Python",
                 "test_cases": [{"index": 0, "input": "1", "expected_output": "1"}]}
            ],
            "answers": [{"question_id": "q1", "content": "B", "elapsed_seconds": 12.5}]
        }))
        .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        assert!(validate(&request()).is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empty_code() {
        let mut dup = request();
        dup.questions[1].id = "q1".to_string();
        assert!(validate(&dup).unwrap_err().contains("duplicate"));

        let mut no_cases = request();
        no_cases.questions[1].scoring = ScoringParams::Code { test_cases: Vec::<TestCase>::new() };
        assert!(validate(&no_cases).unwrap_err().contains("no test cases"));

        let mut negative = request();
        negative.answers[0].elapsed_seconds = Some(-1.0);
        assert!(validate(&negative).is_err());

        let mut blank = request();
        blank.candidate_id = " ".to_string();
        assert!(validate(&blank).is_err());
    }

    #[tokio::test]
    async fn test_fingerprint_endpoint() {
        let code = "def add(a, b):\n    return a + b\n\nprint(add(1, 2))\n";
        let response = fingerprint(ApiJson(FingerprintRequest { code: code.to_string() })).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["slots"].as_array().unwrap().len(), NUM_PERMUTATIONS);
        assert_eq!(body["degenerate"], false);

        let expected = fingerprint::sketch(code);
        assert_eq!(body["slots"][0].as_u64(), Some(expected.slots[0]));
    }

    #[tokio::test]
    async fn test_fingerprint_rejects_oversized() {
        let code = "x".repeat(MAX_FINGERPRINT_BYTES + 1);
        let response = fingerprint(ApiJson(FingerprintRequest { code })).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_compare_endpoint() {
        let left = "for i in range(10):\n    total += i * i\nprint(total)\n";
        let right = "# squares\nfor i in range(10):\n    total += i * i\nprint(total)\n";
        let response = compare(ApiJson(CompareRequest {
            left: left.to_string(),
            right: right.to_string(),
        }))
        .await;

        let body = body_json(response).await;
        assert_eq!(body["minhash_similarity"], 1.0);
        assert_eq!(body["edit_ratio"], 1.0);
        assert_eq!(body["similarity"], 1.0);
    }

    #[tokio::test]
    async fn test_compare_at_edit_ratio_cap() {
        let left: String = (0..20_000).map(|i| char::from(b'a' + (i * 7 % 26) as u8)).collect();
        let right: String = (0..20_000).map(|i| char::from(b'a' + (i * 11 % 26) as u8)).collect();
        let expected = plagiarism::compare(&left, &right);

        let response = compare(ApiJson(CompareRequest { left, right })).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["edit_ratio"].as_f64(), expected.edit_ratio);
        assert_eq!(body["similarity"].as_f64(), Some(expected.score()));
    }
}
