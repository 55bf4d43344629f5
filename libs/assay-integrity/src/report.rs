/// Report Assembler - Integrity Pipeline
///
/// **Core Responsibility:**
/// Run every detector over a finished evaluation plus the raw artifacts
/// (timings, code, free text) and shape the result into an `IntegrityReport`.
///
/// **Flag order:**
/// resume mismatch, timing, guessing, plagiarism, copy-paste. The order is
/// stable so two runs over the same inputs produce identical reports.
///
/// Holds no state. The resume signal is produced elsewhere (it needs the
/// generative collaborator) and passed in as plain data.

use crate::{detectors, plagiarism, scorer};
use assay_common::config::EngineConfig;
use assay_common::types::{
    Answer, CheatFlag, EvaluationResult, IntegrityReport, Question, QuestionType,
};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

/// Outcome of the resume/performance comparison.
#[derive(Debug, Clone, Default)]
pub struct ResumeSignal {
    pub flags: Vec<CheatFlag>,
    /// 0-100, `None` when no resume was supplied or the comparison failed
    pub match_score: Option<f64>,
}

pub struct IntegrityInput<'a> {
    pub evaluation: &'a EvaluationResult,
    pub questions: &'a [Question],
    pub answers: &'a [Answer],
    /// Code of every candidate of the assessment, keyed by candidate id
    pub peers: &'a BTreeMap<String, Vec<String>>,
    pub resume: ResumeSignal,
}

/// First answer per question wins, matching the evaluator.
fn answer_index(answers: &[Answer]) -> HashMap<&str, &Answer> {
    let mut index = HashMap::new();
    for answer in answers {
        index.entry(answer.question_id.as_str()).or_insert(answer);
    }
    index
}

fn answers_of_type<'a>(
    questions: &[Question],
    by_question: &HashMap<&str, &'a Answer>,
    kind: QuestionType,
) -> Vec<&'a Answer> {
    questions
        .iter()
        .filter(|q| q.question_type() == kind)
        .filter_map(|q| by_question.get(q.id.as_str()).copied())
        .collect()
}

pub fn evaluate_integrity(input: IntegrityInput<'_>, config: &EngineConfig) -> IntegrityReport {
    let evaluation = input.evaluation;
    let by_question = answer_index(input.answers);

    let timings: Vec<f64> = input
        .questions
        .iter()
        .filter_map(|q| by_question.get(q.id.as_str()))
        .filter_map(|a| a.elapsed_seconds)
        .collect();

    let own_code: Vec<String> = answers_of_type(input.questions, &by_question, QuestionType::Code)
        .into_iter()
        .filter(|a| !a.content.trim().is_empty())
        .map(|a| a.content.clone())
        .collect();

    let free_text: Vec<(&str, &str)> = answers_of_type(input.questions, &by_question, QuestionType::FreeText)
        .into_iter()
        .map(|a| (a.question_id.as_str(), a.content.as_str()))
        .collect();

    let mut flags = input.resume.flags;

    let timing = detectors::timing::check(&timings, config.min_seconds_per_question);
    flags.extend(timing.flags);

    flags.extend(detectors::guessing::check(&evaluation.results));

    let plagiarism = plagiarism::check(&evaluation.candidate_id, &own_code, input.peers, config);
    flags.extend(plagiarism.flags);

    flags.extend(detectors::copy_paste::check(&free_text));

    let report = assemble(
        &evaluation.candidate_id,
        &evaluation.assessment_id,
        flags,
        input.resume.match_score,
        plagiarism.max_similarity,
        timing.anomaly_score,
        config,
    );

    info!(
        candidate_id = %report.candidate_id,
        integrity_score = report.integrity_score,
        flags = report.flags.len(),
        recommendation = ?report.recommendation,
        "Integrity check complete"
    );

    report
}

/// Score the flag set and shape the final report.
pub fn assemble(
    candidate_id: &str,
    assessment_id: &str,
    flags: Vec<CheatFlag>,
    resume_match_score: Option<f64>,
    plagiarism_score: f64,
    timing_anomaly_score: f64,
    config: &EngineConfig,
) -> IntegrityReport {
    let score = scorer::integrity_score(
        &flags,
        resume_match_score,
        plagiarism_score,
        config.plagiarism_threshold,
    );
    let (is_flagged, recommendation) = scorer::recommend(&flags, score);
    let summary = scorer::summarize(&flags, score);

    IntegrityReport {
        candidate_id: candidate_id.to_string(),
        assessment_id: assessment_id.to_string(),
        flags,
        resume_match_score,
        plagiarism_score: round_to(plagiarism_score, 2),
        timing_anomaly_score: round_to(timing_anomaly_score, 2),
        integrity_score: round_to(score, 1),
        is_flagged,
        recommendation,
        summary,
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
