/// Resume Mismatch Check
///
/// Two delegated calls: extract the skills a resume claims, then compare the
/// claims against measured skill scores. Either call failing yields an empty
/// signal (no flags, no match score) rather than an error.

use crate::llm::{generate_json, GenerationRequest, GenerativeClient, JudgmentError};
use assay_common::config::EngineConfig;
use assay_common::types::{CheatFlag, EvaluationResult, FlagKind, Severity};
use assay_integrity::report::ResumeSignal;
use serde_json::Value;
use tracing::warn;

const PARSE_SYSTEM: &str = "Extract structured resume data. Respond in JSON only.";
const COMPARE_SYSTEM: &str = "Compare resume claims with measured assessment performance. Respond in JSON only.";

/// Resume text beyond this many chars is not sent
const MAX_RESUME_CHARS: usize = 12_000;

async fn extract_claims(client: &dyn GenerativeClient, resume_text: &str) -> Result<Value, JudgmentError> {
    let excerpt: String = resume_text.chars().take(MAX_RESUME_CHARS).collect();
    let prompt = format!(
        "Extract the skills this resume claims.\n\nRESUME:\n---\n{}\n---\n\n\
         Return JSON:\n\
         {{\"claimed_skills\": [{{\"name\": \"Python\", \"level\": \"expert|advanced|intermediate|beginner\", \"years\": 3}}], \
         \"experience_years\": 5.0}}",
        excerpt
    );
    let response = generate_json(client, &GenerationRequest::json(PARSE_SYSTEM, prompt, 0.1)).await?;
    response
        .get("claimed_skills")
        .filter(|v| v.is_array())
        .cloned()
        .ok_or(JudgmentError::MissingField("claimed_skills"))
}

async fn compare_claims(
    client: &dyn GenerativeClient,
    claims: &Value,
    evaluation: &EvaluationResult,
) -> Result<Value, JudgmentError> {
    let prompt = format!(
        "Compare the candidate's resume claims with their measured performance.\n\n\
         RESUME CLAIMS:\n{claims}\n\n\
         MEASURED PERFORMANCE:\n- Overall: {overall:.1}%\n- Per skill: {skills}\n\n\
         Return JSON:\n\
         {{\"match_score\": <number 0-100>, \"mismatches\": [{{\"skill\": \"Python\", \
         \"claimed_level\": \"expert\", \"assessed_level\": \"beginner\", \
         \"gap_severity\": \"low|medium|high|critical\", \"explanation\": \"...\"}}]}}",
        claims = serde_json::to_string_pretty(claims).unwrap_or_else(|_| claims.to_string()),
        overall = evaluation.percentage,
        skills = serde_json::to_string(&evaluation.skill_scores).unwrap_or_default(),
    );
    generate_json(client, &GenerationRequest::json(COMPARE_SYSTEM, prompt, 0.2)).await
}

/// Turn a comparison response into flags and a 0-100 match score.
pub fn interpret(comparison: &Value, evaluation: &EvaluationResult, config: &EngineConfig) -> Option<ResumeSignal> {
    let match_score = comparison
        .get("match_score")
        .and_then(Value::as_f64)
        .filter(|s| s.is_finite())?
        .clamp(0.0, 100.0);

    let mut flags = Vec::new();
    let mismatches = comparison.get("mismatches").and_then(Value::as_array);
    for mismatch in mismatches.into_iter().flatten() {
        let field = |name: &str| mismatch.get(name).and_then(Value::as_str).unwrap_or("?");
        let severity = match Severity::from_str(field("gap_severity")) {
            Some(s) if s >= Severity::High => s,
            _ => continue,
        };
        let skill = field("skill");
        let skill_score = evaluation.skill_scores.get(skill).copied().unwrap_or(0.0);

        flags.push(
            CheatFlag::new(
                FlagKind::ResumeMismatch,
                severity,
                format!(
                    "Skill mismatch: claimed {} in {} but assessed at {} level",
                    field("claimed_level"),
                    skill,
                    field("assessed_level")
                ),
                0.75,
            )
            .with_evidence("skill", skill)
            .with_evidence("claimed", field("claimed_level"))
            .with_evidence("assessed", field("assessed_level"))
            .with_evidence("skill_score", skill_score),
        );
    }

    let threshold = config.resume_mismatch_threshold * 100.0;
    if match_score < threshold {
        flags.push(
            CheatFlag::new(
                FlagKind::ResumeMismatch,
                Severity::Critical,
                format!("Overall resume-performance match is very low ({:.0}%)", match_score),
                0.8,
            )
            .with_evidence("match_score", match_score)
            .with_evidence("threshold", threshold),
        );
    }

    Some(ResumeSignal {
        flags,
        match_score: Some(match_score),
    })
}

pub async fn check(
    client: &dyn GenerativeClient,
    resume_text: &str,
    evaluation: &EvaluationResult,
    config: &EngineConfig,
) -> ResumeSignal {
    if resume_text.trim().is_empty() {
        return ResumeSignal::default();
    }

    let comparison = match extract_claims(client, resume_text).await {
        Ok(claims) => compare_claims(client, &claims, evaluation).await,
        Err(e) => Err(e),
    };

    match comparison {
        Ok(value) => interpret(&value, evaluation, config).unwrap_or_else(|| {
            warn!(candidate_id = %evaluation.candidate_id, "Resume comparison had no usable match score");
            ResumeSignal::default()
        }),
        Err(e) => {
            warn!(candidate_id = %evaluation.candidate_id, error = %e, "Resume check failed");
            ResumeSignal::default()
        }
    }
}
