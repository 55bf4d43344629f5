/// Evaluation Aggregator - Per-Question Scoring and Rollups
///
/// **Core Responsibility:**
/// Turn one candidate's answers into an `EvaluationResult`.
///
/// **Per-question state machine:**
/// - no answer → `skipped`, score 0
/// - exact-choice → trimmed, case-insensitive equality; full points or none
/// - free-text → delegated judgment, clamped to [0, max]; a failed judgment is
///   `error` with score 0
/// - code → `EXECUTION_SCORE_WEIGHT` of the points from the pass ratio, the rest
///   from a delegated 0-10 quality review; a failed review keeps the execution
///   credit and marks the question `error`
///
/// **Rollups:**
/// Skill and section scores are weighted means of per-question percentages
/// (`Question.weight`), not point sums, so a 20-point question does not drown
/// out a 2-point one. Questions worth 0 points are left out.
///
/// Nothing here raises: every failure ends up in a question's status and feedback.

use crate::engine::ExecutionEngine;
use crate::judgment;
use crate::llm::GenerativeClient;
use crate::runner::run_test_cases;
use assay_common::config::EngineConfig;
use assay_common::types::{
    Answer, EvaluationResult, ExecutionOutcome, FailureKind, Question, QuestionResult, QuestionStatus,
    ScoringParams, TestCase,
};
use futures_util::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Everything evaluation needs from the outside world
pub struct EvaluationContext<'a> {
    pub engine: &'a dyn ExecutionEngine,
    pub llm: &'a dyn GenerativeClient,
    pub config: &'a EngineConfig,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn base_result(question: &Question, status: QuestionStatus, feedback: impl Into<String>) -> QuestionResult {
    QuestionResult {
        question_id: question.id.clone(),
        question_type: question.question_type(),
        skill: question.skill.clone(),
        score: 0.0,
        max_score: question.max_points.max(0.0),
        status,
        feedback: feedback.into(),
        selected_answer: None,
        is_correct: None,
        test_results: Vec::new(),
    }
}

/// Deterministic: "B" and " b " are the same answer.
pub fn answers_match(submitted: &str, correct: &str) -> bool {
    submitted.trim().to_lowercase() == correct.trim().to_lowercase()
}

fn evaluate_exact_choice(question: &Question, correct_answer: &str, answer: &Answer) -> QuestionResult {
    let is_correct = answers_match(&answer.content, correct_answer);
    let mut result = base_result(
        question,
        QuestionStatus::Evaluated,
        if is_correct { "Correct" } else { "Incorrect" },
    );
    result.score = if is_correct { result.max_score } else { 0.0 };
    result.selected_answer = Some(answer.content.trim().to_string());
    result.is_correct = Some(is_correct);
    result
}

async fn evaluate_free_text(
    ctx: &EvaluationContext<'_>,
    question: &Question,
    rubric: Option<&Value>,
    expected_points: &[String],
    answer: &Answer,
) -> QuestionResult {
    if answer.content.trim().is_empty() {
        return base_result(question, QuestionStatus::Evaluated, "No answer provided");
    }

    match judgment::grade_free_text(ctx.llm, question, rubric, expected_points, &answer.content).await {
        Ok(judged) => {
            let mut result = base_result(question, QuestionStatus::Evaluated, judged.feedback);
            result.score = round2(judged.score.clamp(0.0, result.max_score));
            if !judged.key_points_missed.is_empty() {
                result.feedback = format!(
                    "{} Missed: {}",
                    result.feedback.trim_end(),
                    judged.key_points_missed.join("; ")
                )
                .trim_start()
                .to_string();
            }
            result
        }
        Err(e) => {
            warn!(question_id = %question.id, error = %e, "Free-text judgment failed");
            base_result(question, QuestionStatus::Error, format!("Evaluation failed: {}", e))
        }
    }
}

async fn evaluate_code(
    ctx: &EvaluationContext<'_>,
    question: &Question,
    test_cases: &[TestCase],
    answer: &Answer,
) -> QuestionResult {
    let language = answer.language.as_deref();
    let outcomes = run_test_cases(ctx.engine, language, &answer.content, test_cases, ctx.config).await;

    let mut result = base_result(question, QuestionStatus::Evaluated, "");
    let total = outcomes.len();
    let passed = outcomes.iter().filter(|o| o.passed).count();

    if answer.content.trim().is_empty() {
        result.feedback = "Empty submission: no code was submitted".to_string();
        result.test_results = outcomes;
        return result;
    }

    let weight = ctx.config.execution_score_weight;
    let pass_ratio = if total > 0 { passed as f64 / total as f64 } else { 0.0 };
    let execution_score = pass_ratio * result.max_score * weight;

    let summary = format!("{}/{} test cases passed.", passed, total);
    let quality_score = match judgment::review_code_quality(
        ctx.llm,
        question,
        &answer.content,
        language.unwrap_or("unknown"),
        passed,
        total,
    )
    .await
    {
        Ok(review) => {
            result.feedback = format!("{} {}", summary, review.feedback).trim_end().to_string();
            review.quality_score.clamp(0.0, 10.0) / 10.0 * result.max_score * (1.0 - weight)
        }
        Err(e) => {
            warn!(question_id = %question.id, error = %e, "Code quality review failed");
            result.status = QuestionStatus::Error;
            result.feedback = format!("{} Code quality review failed: {}", summary, e);
            0.0
        }
    };

    debug!(
        question_id = %question.id,
        passed = passed,
        total = total,
        execution_score = execution_score,
        quality_score = quality_score,
        "Code question scored"
    );

    result.score = round2((execution_score + quality_score).clamp(0.0, result.max_score));
    result.test_results = outcomes;
    result
}

/// Score one question. Never fails.
pub async fn evaluate_question(
    ctx: &EvaluationContext<'_>,
    question: &Question,
    answer: Option<&Answer>,
) -> QuestionResult {
    let answer = match answer {
        Some(answer) => answer,
        None => {
            let mut result = base_result(question, QuestionStatus::Skipped, "Not answered");
            if let ScoringParams::Code { test_cases } = &question.scoring {
                // Keep one outcome per test case even when nothing was submitted
                result.test_results = test_cases
                    .iter()
                    .map(|tc| {
                        ExecutionOutcome::failed(tc.index, FailureKind::EmptySubmission, "Not answered")
                    })
                    .collect();
            }
            return result;
        }
    };

    match &question.scoring {
        ScoringParams::ExactChoice { correct_answer, .. } => evaluate_exact_choice(question, correct_answer, answer),
        ScoringParams::FreeText {
            rubric,
            expected_points,
        } => evaluate_free_text(ctx, question, rubric.as_ref(), expected_points, answer).await,
        ScoringParams::Code { test_cases } => evaluate_code(ctx, question, test_cases, answer).await,
    }
}

#[derive(Default)]
struct WeightedMean {
    weighted_sum: f64,
    total_weight: f64,
}

impl WeightedMean {
    fn add(&mut self, percentage: f64, weight: f64) {
        self.weighted_sum += percentage * weight;
        self.total_weight += weight;
    }

    fn value(&self) -> f64 {
        if self.total_weight > 0.0 {
            round2(self.weighted_sum / self.total_weight)
        } else {
            0.0
        }
    }
}

/// Fill totals, percentage, skill and section maps from the per-question results.
pub fn roll_up(
    candidate_id: &str,
    assessment_id: &str,
    questions: &[Question],
    results: Vec<QuestionResult>,
) -> EvaluationResult {
    let mut skills: BTreeMap<String, WeightedMean> = BTreeMap::new();
    let mut sections: BTreeMap<String, WeightedMean> = BTreeMap::new();

    for (question, result) in questions.iter().zip(&results) {
        if result.max_score <= 0.0 {
            continue;
        }
        let percentage = (result.score / result.max_score * 100.0).clamp(0.0, 100.0);
        let weight = question.weight.max(0.0);
        skills.entry(question.skill.clone()).or_default().add(percentage, weight);
        sections
            .entry(question.question_type().section().to_string())
            .or_default()
            .add(percentage, weight);
    }

    let total_score: f64 = results.iter().map(|r| r.score).sum();
    let max_total_score: f64 = results.iter().map(|r| r.max_score).sum();
    let percentage = if max_total_score > 0.0 {
        round2(total_score / max_total_score * 100.0)
    } else {
        0.0
    };

    EvaluationResult {
        candidate_id: candidate_id.to_string(),
        assessment_id: assessment_id.to_string(),
        results,
        total_score: round2(total_score),
        max_total_score: round2(max_total_score),
        percentage,
        skill_scores: skills.into_iter().map(|(k, v)| (k, v.value())).collect(),
        section_scores: sections.into_iter().map(|(k, v)| (k, v.value())).collect(),
        strengths: Vec::new(),
        weaknesses: Vec::new(),
        overall_feedback: String::new(),
    }
}

/// Evaluate a whole submission.
///
/// Questions are scored concurrently; results come back in question order.
/// The first answer for a question wins, answers to unknown questions are ignored.
pub async fn evaluate_submission(
    ctx: &EvaluationContext<'_>,
    candidate_id: &str,
    assessment_id: &str,
    questions: &[Question],
    answers: &[Answer],
) -> EvaluationResult {
    let mut by_question: HashMap<&str, &Answer> = HashMap::new();
    for answer in answers {
        if by_question.contains_key(answer.question_id.as_str()) {
            warn!(question_id = %answer.question_id, "Duplicate answer ignored");
            continue;
        }
        by_question.insert(answer.question_id.as_str(), answer);
    }

    let known: HashSet<&str> = questions.iter().map(|q| q.id.as_str()).collect();
    for id in by_question.keys().filter(|id| !known.contains(*id)) {
        warn!(question_id = %id, "Answer references unknown question");
    }

    let results = join_all(
        questions
            .iter()
            .map(|q| evaluate_question(ctx, q, by_question.get(q.id.as_str()).copied())),
    )
    .await;

    let mut evaluation = roll_up(candidate_id, assessment_id, questions, results);

    match judgment::summarize_performance(ctx.llm, &evaluation).await {
        Ok(summary) => {
            evaluation.strengths = summary.strengths;
            evaluation.weaknesses = summary.weaknesses;
            evaluation.overall_feedback = summary.overall_feedback;
        }
        Err(e) => warn!(candidate_id = %candidate_id, error = %e, "Performance summary failed"),
    }

    info!(
        candidate_id = %candidate_id,
        questions = questions.len(),
        total_score = evaluation.total_score,
        percentage = evaluation.percentage,
        "Evaluation complete"
    );

    evaluation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TestExecutionOutput;
    use crate::judgment::{CODE_REVIEW_SYSTEM, FREE_TEXT_SYSTEM, SUMMARY_SYSTEM};
    use crate::llm::{GenerationRequest, JudgmentError};
    use assay_common::types::Language;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Echoes stdin to stdout; sources containing "loop" time out.
    struct EchoEngine;

    #[async_trait]
    impl ExecutionEngine for EchoEngine {
        fn supports(&self, language: Language) -> bool {
            matches!(language, Language::Python | Language::JavaScript)
        }

        async fn execute(
            &self,
            _language: Language,
            source_code: &str,
            input: &str,
            _timeout: Duration,
        ) -> anyhow::Result<TestExecutionOutput> {
            if source_code.contains("loop") {
                return Ok(TestExecutionOutput {
                    timed_out: true,
                    ..Default::default()
                });
            }
            Ok(TestExecutionOutput {
                stdout: input.to_string(),
                exit_code: Some(0),
                ..Default::default()
            })
        }
    }

    /// Deterministic judge keyed on the system prompt
    struct StubJudge {
        free_text: &'static str,
        code_review: &'static str,
        summary: &'static str,
        calls: AtomicUsize,
    }

    impl StubJudge {
        fn new(free_text: &'static str, code_review: &'static str) -> Self {
            Self {
                free_text,
                code_review,
                summary: r#"{"strengths": ["Python"], "weaknesses": [], "overall_feedback": "Solid."}"#,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl GenerativeClient for StubJudge {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, JudgmentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = match request.system.as_str() {
                FREE_TEXT_SYSTEM => self.free_text,
                CODE_REVIEW_SYSTEM => self.code_review,
                SUMMARY_SYSTEM => self.summary,
                _ => "",
            };
            Ok(reply.to_string())
        }
    }

    fn question(id: &str, skill: &str, max_points: f64, scoring: ScoringParams) -> Question {
        Question {
            id: id.to_string(),
            prompt: format!("Prompt for {}", id),
            max_points,
            skill: skill.to_string(),
            weight: 1.0,
            difficulty: None,
            scoring,
        }
    }

    fn choice(id: &str, correct: &str) -> Question {
        question(
            id,
            "Fundamentals",
            2.0,
            ScoringParams::ExactChoice {
                correct_answer: correct.to_string(),
                options: vec!["A".into(), "B".into(), "C".into()],
            },
        )
    }

    fn free_text(id: &str) -> Question {
        question(
            id,
            "Databases",
            10.0,
            ScoringParams::FreeText {
                rubric: None,
                expected_points: vec!["B-tree".to_string()],
            },
        )
    }

    fn coding(id: &str, cases: u32) -> Question {
        question(
            id,
            "Python",
            10.0,
            ScoringParams::Code {
                test_cases: (0..cases)
                    .map(|i| TestCase {
                        index: i,
                        input: format!("{}", i * 7),
                        expected_output: if i == 0 { "mismatch".to_string() } else { format!("{}", i * 7) },
                        hidden: false,
                    })
                    .collect(),
            },
        )
    }

    fn answer(question_id: &str, content: &str) -> Answer {
        Answer {
            question_id: question_id.to_string(),
            content: content.to_string(),
            language: None,
            elapsed_seconds: Some(30.0),
        }
    }

    fn code_answer(question_id: &str, content: &str) -> Answer {
        Answer {
            language: Some("python".to_string()),
            ..answer(question_id, content)
        }
    }

    fn ctx<'a>(judge: &'a StubJudge, config: &'a EngineConfig) -> EvaluationContext<'a> {
        EvaluationContext {
            engine: &EchoEngine,
            llm: judge,
            config,
        }
    }

    #[test]
    fn test_answers_match_ignores_case_and_whitespace() {
        assert!(answers_match("B", " b "));
        assert!(answers_match("\tTrue\n", "true"));
        assert!(!answers_match("B", "C"));
        assert!(!answers_match("", "A"));
    }

    #[tokio::test]
    async fn test_exact_choice_is_deterministic() {
        let judge = StubJudge::new("", "");
        let config = EngineConfig::default();
        let ctx = ctx(&judge, &config);
        let q = choice("q1", "B");

        let first = evaluate_question(&ctx, &q, Some(&answer("q1", " b "))).await;
        let second = evaluate_question(&ctx, &q, Some(&answer("q1", " b "))).await;
        assert_eq!(first, second);
        assert_eq!(first.score, 2.0);
        assert_eq!(first.is_correct, Some(true));
        assert_eq!(first.selected_answer.as_deref(), Some("b"));
        assert_eq!(judge.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unanswered_is_skipped() {
        let judge = StubJudge::new("", "");
        let config = EngineConfig::default();
        let result = evaluate_question(&ctx(&judge, &config), &coding("q1", 3), None).await;
        assert_eq!(result.status, QuestionStatus::Skipped);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.test_results.len(), 3);
    }

    #[tokio::test]
    async fn test_free_text_score_is_clamped() {
        let judge = StubJudge::new(r#"{"total_score": 42, "feedback": "Great"}"#, "");
        let config = EngineConfig::default();
        let result = evaluate_question(&ctx(&judge, &config), &free_text("q1"), Some(&answer("q1", "Indexes use B-trees"))).await;
        assert_eq!(result.status, QuestionStatus::Evaluated);
        assert_eq!(result.score, 10.0);

        let judge = StubJudge::new(r#"{"total_score": -3, "feedback": "Off topic"}"#, "");
        let result = evaluate_question(&ctx(&judge, &config), &free_text("q1"), Some(&answer("q1", "Bananas"))).await;
        assert_eq!(result.score, 0.0);
    }

    #[tokio::test]
    async fn test_free_text_malformed_response_is_error() {
        let judge = StubJudge::new("Sorry, I can't help with that.", "");
        let config = EngineConfig::default();
        let result = evaluate_question(&ctx(&judge, &config), &free_text("q1"), Some(&answer("q1", "Indexes use B-trees"))).await;
        assert_eq!(result.status, QuestionStatus::Error);
        assert_eq!(result.score, 0.0);
        assert!(result.feedback.starts_with("Evaluation failed"));
    }

    #[tokio::test]
    async fn test_empty_free_text_makes_no_call() {
        let judge = StubJudge::new(r#"{"total_score": 10}"#, "");
        let config = EngineConfig::default();
        let result = evaluate_question(&ctx(&judge, &config), &free_text("q1"), Some(&answer("q1", "  "))).await;
        assert_eq!(result.status, QuestionStatus::Evaluated);
        assert_eq!(result.score, 0.0);
        assert_eq!(judge.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_code_split_between_execution_and_quality() {
        // 3 of 4 cases pass, quality 5/10: 0.75 * 10 * 0.6 + 0.5 * 10 * 0.4 = 6.5
        let judge = StubJudge::new("", r#"{"quality_score": 5, "feedback": "Readable."}"#);
        let config = EngineConfig::default();
        let result = evaluate_question(
            &ctx(&judge, &config),
            &coding("q1", 4),
            Some(&code_answer("q1", "print(input())")),
        )
        .await;

        assert_eq!(result.status, QuestionStatus::Evaluated);
        assert_eq!(result.test_results.len(), 4);
        assert_eq!(result.test_results.iter().filter(|o| o.passed).count(), 3);
        assert_eq!(result.score, 6.5);
        assert_eq!(result.feedback, "3/4 test cases passed. Readable.");
    }

    #[tokio::test]
    async fn test_code_review_failure_keeps_execution_credit() {
        let judge = StubJudge::new("", "```\nnot json\n```");
        let config = EngineConfig::default();
        let result = evaluate_question(
            &ctx(&judge, &config),
            &coding("q1", 4),
            Some(&code_answer("q1", "print(input())")),
        )
        .await;

        assert_eq!(result.status, QuestionStatus::Error);
        assert_eq!(result.score, 4.5);
    }

    #[tokio::test]
    async fn test_empty_code_submission() {
        let judge = StubJudge::new("", r#"{"quality_score": 10}"#);
        let config = EngineConfig::default();
        let result =
            evaluate_question(&ctx(&judge, &config), &coding("q1", 3), Some(&code_answer("q1", "\n\n"))).await;

        assert_eq!(result.status, QuestionStatus::Evaluated);
        assert_eq!(result.score, 0.0);
        assert!(result.feedback.to_lowercase().contains("empty submission"));
        assert_eq!(result.test_results.len(), 3);
        assert!(result
            .test_results
            .iter()
            .all(|o| o.failure == Some(FailureKind::EmptySubmission)));
        assert_eq!(judge.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_infinite_loop_is_contained() {
        let judge = StubJudge::new("", r#"{"quality_score": 0}"#);
        let config = EngineConfig::default();
        let result = evaluate_question(
            &ctx(&judge, &config),
            &coding("q1", 2),
            Some(&code_answer("q1", "while True: loop()")),
        )
        .await;

        assert_eq!(result.status, QuestionStatus::Evaluated);
        assert_eq!(result.score, 0.0);
        assert!(result
            .test_results
            .iter()
            .all(|o| o.failure == Some(FailureKind::TimeLimitExceeded)));
    }

    #[tokio::test]
    async fn test_submission_preserves_order_and_rolls_up() {
        let judge = StubJudge::new(
            r#"{"total_score": 5, "feedback": "Partial", "key_points_missed": ["B-tree"]}"#,
            r#"{"quality_score": 10, "feedback": "Clean."}"#,
        );
        let config = EngineConfig::default();
        let questions = vec![choice("q1", "A"), free_text("q2"), coding("q3", 2), choice("q4", "C")];
        let answers = vec![
            answer("q1", "a"),
            answer("q2", "Indexes are sorted"),
            code_answer("q3", "print(input())"),
            answer("q1", "B"),
            answer("q9", "stray"),
        ];

        let evaluation = evaluate_submission(&ctx(&judge, &config), "cand-a", "asmt-1", &questions, &answers).await;

        let ids: Vec<&str> = evaluation.results.iter().map(|r| r.question_id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q2", "q3", "q4"]);
        assert_eq!(evaluation.results[0].score, 2.0);
        assert_eq!(evaluation.results[1].feedback, "Partial Missed: B-tree");
        assert_eq!(evaluation.results[3].status, QuestionStatus::Skipped);

        // q3: 1 of 2 passes, quality 10: 0.5 * 6 + 4 = 7
        assert_eq!(evaluation.results[2].score, 7.0);
        assert_eq!(evaluation.total_score, 14.0);
        assert_eq!(evaluation.max_total_score, 24.0);
        assert_eq!(evaluation.percentage, 58.33);

        // Fundamentals: 100% and 0% averaged, not point-summed
        assert_eq!(evaluation.skill_scores["Fundamentals"], 50.0);
        assert_eq!(evaluation.skill_scores["Databases"], 50.0);
        assert_eq!(evaluation.skill_scores["Python"], 70.0);
        assert_eq!(evaluation.section_scores["exact_choice"], 50.0);
        assert_eq!(evaluation.section_scores["code"], 70.0);

        assert_eq!(evaluation.strengths, vec!["Python"]);
        assert_eq!(evaluation.overall_feedback, "Solid.");
    }

    #[test]
    fn test_roll_up_weights_percentages() {
        let mut heavy = free_text("q1");
        heavy.weight = 3.0;
        let light = free_text("q2");
        let mut r1 = base_result(&heavy, QuestionStatus::Evaluated, "");
        r1.score = 10.0;
        let r2 = base_result(&light, QuestionStatus::Evaluated, "");

        let evaluation = roll_up("c", "a", &[heavy, light], vec![r1, r2]);
        assert_eq!(evaluation.skill_scores["Databases"], 75.0);
        assert_eq!(evaluation.percentage, 50.0);
    }

    #[test]
    fn test_roll_up_ignores_zero_point_questions() {
        let zero = question("q1", "Warmup", 0.0, ScoringParams::FreeText { rubric: None, expected_points: vec![] });
        let result = base_result(&zero, QuestionStatus::Evaluated, "");
        let evaluation = roll_up("c", "a", &[zero], vec![result]);
        assert!(evaluation.skill_scores.is_empty());
        assert_eq!(evaluation.percentage, 0.0);
    }
}
