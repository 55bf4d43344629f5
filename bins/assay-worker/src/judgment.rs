// Prompts and response shapes for delegated judgment
use crate::llm::{generate_json, GenerationRequest, GenerativeClient, JudgmentError};
use assay_common::types::{EvaluationResult, Question};
use serde_json::Value;

pub const FREE_TEXT_SYSTEM: &str = "You are an expert technical evaluator. Grade candidate answers strictly \
against the rubric and the expected key points. Be fair but rigorous. Always respond in valid JSON.";

pub const CODE_REVIEW_SYSTEM: &str = "You are an expert code reviewer grading a submission for a technical \
assessment. Judge readability, efficiency, approach and error handling. Always respond in valid JSON.";

pub const SUMMARY_SYSTEM: &str = "You are a senior technical hiring manager summarizing a candidate's \
assessment results. Be concrete and actionable. Always respond in valid JSON.";

#[derive(Debug, Clone, PartialEq)]
pub struct FreeTextJudgment {
    /// As returned; the evaluator clamps it to the question's range
    pub score: f64,
    pub feedback: String,
    pub key_points_missed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityJudgment {
    /// 0-10 as returned
    pub quality_score: f64,
    pub feedback: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceSummary {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub overall_feedback: String,
}

/// Numbers sometimes come back quoted
fn number(value: &Value, field: &'static str) -> Result<f64, JudgmentError> {
    let raw = value.get(field).ok_or(JudgmentError::MissingField(field))?;
    raw.as_f64()
        .or_else(|| raw.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
        .filter(|n| n.is_finite())
        .ok_or(JudgmentError::MissingField(field))
}

fn text(value: &Value, field: &str) -> String {
    value.get(field).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn strings(value: &Value, field: &str) -> Vec<String> {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "(none given)".to_string();
    }
    items.iter().map(|p| format!("- {}", p)).collect::<Vec<_>>().join("\n")
}

pub async fn grade_free_text(
    client: &dyn GenerativeClient,
    question: &Question,
    rubric: Option<&Value>,
    expected_points: &[String],
    answer: &str,
) -> Result<FreeTextJudgment, JudgmentError> {
    let rubric = rubric
        .map(|r| serde_json::to_string_pretty(r).unwrap_or_else(|_| r.to_string()))
        .unwrap_or_else(|| "(score on completeness, accuracy, clarity and depth)".to_string());

    let prompt = format!(
        "Grade this answer to a {difficulty} {skill} question.\n\n\
         QUESTION: {question}\n\n\
         EXPECTED KEY POINTS:\n{points}\n\n\
         RUBRIC:\n{rubric}\n\n\
         CANDIDATE ANSWER:\n---\n{answer}\n---\n\n\
         Return JSON:\n\
         {{\"total_score\": <number 0 to {max}>, \"feedback\": \"specific, actionable feedback\", \
         \"key_points_covered\": [\"...\"], \"key_points_missed\": [\"...\"]}}\n\n\
         Rules: score only against the rubric; an irrelevant answer scores 0; partial credit is allowed.",
        difficulty = question.difficulty.as_deref().unwrap_or("standard"),
        skill = question.skill,
        question = question.prompt,
        points = bullet_list(expected_points),
        rubric = rubric,
        answer = answer,
        max = question.max_points,
    );

    let response = generate_json(client, &GenerationRequest::json(FREE_TEXT_SYSTEM, prompt, 0.2)).await?;

    Ok(FreeTextJudgment {
        score: number(&response, "total_score")?,
        feedback: text(&response, "feedback"),
        key_points_missed: strings(&response, "key_points_missed"),
    })
}

pub async fn review_code_quality(
    client: &dyn GenerativeClient,
    question: &Question,
    code: &str,
    language: &str,
    tests_passed: usize,
    total_tests: usize,
) -> Result<QualityJudgment, JudgmentError> {
    let prompt = format!(
        "Review this submission.\n\n\
         PROBLEM: {problem}\nLANGUAGE: {language}\nDIFFICULTY: {difficulty}\n\n\
         CODE:\n```{language}\n{code}\n```\n\n\
         TEST RESULTS: {passed}/{total} passed\n\n\
         Return JSON:\n\
         {{\"quality_score\": <number 0-10>, \"feedback\": \"code review feedback\", \
         \"issues\": [\"...\"], \"suggestions\": [\"...\"]}}",
        problem = question.prompt,
        language = language,
        difficulty = question.difficulty.as_deref().unwrap_or("standard"),
        code = code,
        passed = tests_passed,
        total = total_tests,
    );

    let request = GenerationRequest::json(CODE_REVIEW_SYSTEM, prompt, 0.2).for_code();
    let response = generate_json(client, &request).await?;

    Ok(QualityJudgment {
        quality_score: number(&response, "quality_score")?,
        feedback: text(&response, "feedback"),
    })
}

pub async fn summarize_performance(
    client: &dyn GenerativeClient,
    evaluation: &EvaluationResult,
) -> Result<PerformanceSummary, JudgmentError> {
    let sections = evaluation
        .section_scores
        .iter()
        .map(|(name, pct)| format!("- {}: {:.1}%", name, pct))
        .collect::<Vec<_>>()
        .join("\n");
    let skills = evaluation
        .skill_scores
        .iter()
        .map(|(name, pct)| format!("- {}: {:.1}%", name, pct))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        "Summarize this candidate's assessment performance.\n\n\
         TOTAL: {total:.1}/{max:.1} ({pct:.1}%)\n\n\
         SECTIONS:\n{sections}\n\nSKILLS:\n{skills}\n\n\
         Return JSON:\n\
         {{\"strengths\": [\"...\"], \"weaknesses\": [\"...\"], \
         \"overall_feedback\": \"2-3 paragraph summary\"}}",
        total = evaluation.total_score,
        max = evaluation.max_total_score,
        pct = evaluation.percentage,
        sections = sections,
        skills = skills,
    );

    let response = generate_json(client, &GenerationRequest::json(SUMMARY_SYSTEM, prompt, 0.3)).await?;

    Ok(PerformanceSummary {
        strengths: strings(&response, "strengths"),
        weaknesses: strings(&response, "weaknesses"),
        overall_feedback: text(&response, "overall_feedback"),
    })
}
