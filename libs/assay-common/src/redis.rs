use crate::types::{EvaluationJob, JobStatus, SubmissionReport};
use redis::{AsyncCommands, RedisResult};

/// Redis queue semantics shared by the API and the worker.
/// Keys are deterministic so both sides never drift.

pub const QUEUE_KEY: &str = "assay:queue:evaluation";
pub const RESULT_PREFIX: &str = "assay:result";
pub const STATUS_PREFIX: &str = "assay:status";

/// Results expire after 24 hours; the persistence layer copies them out before then.
pub const RESULT_TTL_SECONDS: u64 = 86400;

pub fn result_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, job_id)
}

pub fn status_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", STATUS_PREFIX, job_id)
}

fn serde_failure(context: &'static str, e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, context, e.to_string()))
}

/// Push a job onto the evaluation queue (RPUSH, FIFO with BLPOP)
pub async fn push_job(
    conn: &mut redis::aio::ConnectionManager,
    job: &EvaluationJob,
) -> RedisResult<()> {
    let payload = serde_json::to_string(job).map_err(|e| serde_failure("serialization error", e))?;
    conn.rpush(QUEUE_KEY, payload).await
}

/// Pop a job, blocking for at most `timeout_seconds` so callers can notice shutdown
pub async fn pop_job(
    conn: &mut redis::aio::ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<EvaluationJob>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_KEY, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let job: EvaluationJob =
                serde_json::from_str(&payload).map_err(|e| serde_failure("deserialization error", e))?;
            Ok(Some(job))
        }
        None => Ok(None),
    }
}

pub async fn store_report(
    conn: &mut redis::aio::ConnectionManager,
    report: &SubmissionReport,
) -> RedisResult<()> {
    let payload = serde_json::to_string(report).map_err(|e| serde_failure("serialization error", e))?;
    let _: () = conn.set_ex(result_key(&report.job_id), payload, RESULT_TTL_SECONDS).await?;

    // Status is stored separately for cheap polling
    set_status(conn, &report.job_id, report.status).await
}

pub async fn set_status(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
    status: JobStatus,
) -> RedisResult<()> {
    let payload = serde_json::to_string(&status).map_err(|e| serde_failure("serialization error", e))?;
    conn.set_ex(status_key(job_id), payload, RESULT_TTL_SECONDS).await
}

pub async fn get_status(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<Option<JobStatus>> {
    let payload: Option<String> = conn.get(status_key(job_id)).await?;

    match payload {
        Some(data) => {
            let status: JobStatus =
                serde_json::from_str(&data).map_err(|e| serde_failure("deserialization error", e))?;
            Ok(Some(status))
        }
        None => Ok(None),
    }
}

pub async fn get_report(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<Option<SubmissionReport>> {
    let payload: Option<String> = conn.get(result_key(job_id)).await?;

    match payload {
        Some(data) => {
            let report: SubmissionReport =
                serde_json::from_str(&data).map_err(|e| serde_failure("deserialization error", e))?;
            Ok(Some(report))
        }
        None => Ok(None),
    }
}
