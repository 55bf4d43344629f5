/// Worker Loop - Queue Consumption and Shutdown
///
/// Pops one job at a time, evaluates it and persists the report. Shutdown is
/// observed only between jobs: a job that has been popped is always finished
/// and stored before the loop returns, because BLPOP has already removed it
/// from the queue and nothing else would pick it up again.

use crate::evaluator::EvaluationContext;
use crate::executor;
use assay_common::redis;
use assay_common::types::{EvaluationJob, JobStatus, SubmissionReport};
use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use ::redis::RedisResult;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// BLPOP timeout, which also bounds how long a shutdown waits on an idle queue
const POLL_TIMEOUT_SECONDS: f64 = 5.0;
const REDIS_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Source of jobs and sink for their outcomes.
#[async_trait]
pub trait JobQueue: Send {
    async fn next_job(&mut self, timeout_seconds: f64) -> RedisResult<Option<EvaluationJob>>;
    async fn complete(&mut self, report: &SubmissionReport) -> RedisResult<()>;
    async fn fail(&mut self, job_id: &Uuid) -> RedisResult<()>;
}

#[async_trait]
impl JobQueue for ConnectionManager {
    async fn next_job(&mut self, timeout_seconds: f64) -> RedisResult<Option<EvaluationJob>> {
        redis::pop_job(self, timeout_seconds).await
    }

    async fn complete(&mut self, report: &SubmissionReport) -> RedisResult<()> {
        redis::store_report(self, report).await
    }

    async fn fail(&mut self, job_id: &Uuid) -> RedisResult<()> {
        redis::set_status(self, job_id, JobStatus::Failed).await
    }
}

async fn handle_job<Q: JobQueue>(queue: &mut Q, ctx: &EvaluationContext<'_>, job: EvaluationJob) {
    info!(
        job_id = %job.id,
        candidate_id = %job.candidate_id,
        assessment_id = %job.assessment_id,
        questions = job.questions.len(),
        answers = job.answers.len(),
        peers = job.peer_submissions.len(),
        has_resume = job.resume_text.is_some(),
        "Received job"
    );

    let start = Instant::now();
    let report = match executor::process_job(&job, ctx).await {
        Ok(report) => report,
        Err(e) => {
            error!(job_id = %job.id, error = %e, "Evaluation failed");
            if let Err(e) = queue.fail(&job.id).await {
                error!(job_id = %job.id, error = %e, "Failed to record job failure");
            }
            return;
        }
    };

    info!(
        job_id = %job.id,
        total_score = report.evaluation.total_score,
        max_score = report.evaluation.max_total_score,
        integrity_score = report.integrity.integrity_score,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Evaluation completed"
    );

    match queue.complete(&report).await {
        Ok(()) => info!(job_id = %job.id, "Report persisted to Redis"),
        Err(e) => error!(job_id = %job.id, error = %e, "Failed to persist report"),
    }
}

/// Consume jobs until `shutdown` turns true.
#[instrument(skip_all)]
pub async fn worker_loop<Q: JobQueue>(
    queue: &mut Q,
    ctx: &EvaluationContext<'_>,
    mut shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        match queue.next_job(POLL_TIMEOUT_SECONDS).await {
            Ok(Some(job)) => handle_job(queue, ctx, job).await,
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::select! {
                    _ = tokio::time::sleep(REDIS_RETRY_DELAY) => {}
                    Ok(()) = shutdown.changed() => {}
                }
            }
        }
    }
    info!("Shutdown requested, worker loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests::{job, EchoEngine, Unavailable};
    use assay_common::config::EngineConfig;
    use std::collections::{BTreeMap, VecDeque};

    /// In-memory queue; optionally raises the shutdown flag as soon as a job is handed out
    struct MemoryQueue {
        pending: VecDeque<EvaluationJob>,
        completed: Vec<SubmissionReport>,
        failed: Vec<Uuid>,
        stop_on_pop: Option<watch::Sender<bool>>,
    }

    impl MemoryQueue {
        fn new(jobs: Vec<EvaluationJob>) -> Self {
            Self {
                pending: jobs.into(),
                completed: Vec::new(),
                failed: Vec::new(),
                stop_on_pop: None,
            }
        }
    }

    #[async_trait]
    impl JobQueue for MemoryQueue {
        async fn next_job(&mut self, _timeout_seconds: f64) -> RedisResult<Option<EvaluationJob>> {
            let job = self.pending.pop_front();
            if job.is_some() {
                if let Some(stop) = &self.stop_on_pop {
                    stop.send(true).unwrap();
                }
            }
            Ok(job)
        }

        async fn complete(&mut self, report: &SubmissionReport) -> RedisResult<()> {
            self.completed.push(report.clone());
            Ok(())
        }

        async fn fail(&mut self, job_id: &Uuid) -> RedisResult<()> {
            self.failed.push(*job_id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_shutdown_mid_job_still_stores_report() {
        let config = EngineConfig::default();
        let ctx = EvaluationContext {
            engine: &EchoEngine,
            llm: &Unavailable,
            config: &config,
        };
        let first = job(BTreeMap::new());
        let second = job(BTreeMap::new());
        let (tx, rx) = watch::channel(false);
        let mut queue = MemoryQueue::new(vec![first.clone(), second.clone()]);
        queue.stop_on_pop = Some(tx);

        worker_loop(&mut queue, &ctx, rx).await;

        assert_eq!(queue.completed.len(), 1);
        assert_eq!(queue.completed[0].job_id, first.id);
        assert_eq!(queue.completed[0].status, JobStatus::Completed);
        // The second job was never taken off the queue
        assert_eq!(queue.pending.len(), 1);
        assert_eq!(queue.pending[0].id, second.id);
        assert!(queue.failed.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_before_start_pops_nothing() {
        let config = EngineConfig::default();
        let ctx = EvaluationContext {
            engine: &EchoEngine,
            llm: &Unavailable,
            config: &config,
        };
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let mut queue = MemoryQueue::new(vec![job(BTreeMap::new())]);

        worker_loop(&mut queue, &ctx, rx).await;

        assert!(queue.completed.is_empty());
        assert_eq!(queue.pending.len(), 1);
    }
}
