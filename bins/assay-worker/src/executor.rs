/// Job Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Turn one queued `EvaluationJob` into a `SubmissionReport`.
///
/// **Pipeline:**
/// 1. Score every question (evaluator.rs)
/// 2. Compare the resume against measured skills, if a resume was supplied (resume.rs)
/// 3. Run the integrity detectors over the finished evaluation (assay-integrity)
///
/// This module is the glue layer. It knows nothing about how code executes,
/// how answers are judged or how flags are weighted.
///
/// Step 3 is CPU-bound (pairwise similarity against every peer) and runs on
/// the blocking pool.

use crate::evaluator::{evaluate_submission, EvaluationContext};
use crate::resume;
use assay_common::types::{EvaluationJob, JobStatus, SubmissionReport};
use assay_integrity::report::{evaluate_integrity, IntegrityInput, ResumeSignal};
use anyhow::Context;
use chrono::Utc;
use tracing::{info, instrument};

#[instrument(skip_all, fields(job_id = %job.id, candidate_id = %job.candidate_id))]
pub async fn process_job(job: &EvaluationJob, ctx: &EvaluationContext<'_>) -> anyhow::Result<SubmissionReport> {
    let evaluation = evaluate_submission(
        ctx,
        &job.candidate_id,
        &job.assessment_id,
        &job.questions,
        &job.answers,
    )
    .await;

    let resume = match job.resume_text.as_deref() {
        Some(text) => resume::check(ctx.llm, text, &evaluation, ctx.config).await,
        None => ResumeSignal::default(),
    };

    let config = ctx.config.clone();
    let questions = job.questions.clone();
    let answers = job.answers.clone();
    let peers = job.peer_submissions.clone();
    let (evaluation, integrity) = tokio::task::spawn_blocking(move || {
        let integrity = evaluate_integrity(
            IntegrityInput {
                evaluation: &evaluation,
                questions: &questions,
                answers: &answers,
                peers: &peers,
                resume,
            },
            &config,
        );
        (evaluation, integrity)
    })
    .await
    .context("Integrity check task failed")?;

    info!(
        percentage = evaluation.percentage,
        integrity_score = integrity.integrity_score,
        recommendation = ?integrity.recommendation,
        flags = integrity.flags.len(),
        "Job processed"
    );

    Ok(SubmissionReport {
        job_id: job.id,
        status: JobStatus::Completed,
        evaluation,
        integrity,
        completed_at: Utc::now(),
    })
}
