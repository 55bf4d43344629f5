use assay_common::types::{CheatFlag, FlagKind, QuestionResult, QuestionType, Severity};
use std::collections::BTreeMap;

const MIN_QUESTIONS: usize = 5;
const DOMINANCE_SHARE: f64 = 0.7;
const CHANCE_ACCURACY: f64 = 0.3;
const MIN_QUESTIONS_FOR_ACCURACY: usize = 8;

/// Look for guessing in exact-choice results.
///
/// Two independent tests: one option picked for most answers (systematic bias),
/// and accuracy no better than chance. Both can fire for the same candidate.
pub fn check(results: &[QuestionResult]) -> Vec<CheatFlag> {
    let mut flags = Vec::new();
    let choices: Vec<&QuestionResult> = results
        .iter()
        .filter(|r| r.question_type == QuestionType::ExactChoice)
        .collect();

    if choices.len() < MIN_QUESTIONS {
        return flags;
    }

    let answers: Vec<String> = choices
        .iter()
        .filter_map(|r| r.selected_answer.as_deref())
        .map(|a| a.trim().to_uppercase())
        .filter(|a| !a.is_empty())
        .collect();

    if answers.is_empty() {
        flags.push(
            CheatFlag::new(FlagKind::RandomGuess, Severity::Critical, "No exact-choice answers provided", 0.95)
                .with_evidence("answered", 0)
                .with_evidence("total", choices.len()),
        );
        return flags;
    }

    let mut distribution: BTreeMap<String, usize> = BTreeMap::new();
    for answer in &answers {
        *distribution.entry(answer.clone()).or_insert(0) += 1;
    }
    let most_common = distribution.values().copied().max().unwrap_or(0);
    let most_common_share = most_common as f64 / answers.len() as f64;
    if answers.len() >= MIN_QUESTIONS && most_common_share > DOMINANCE_SHARE {
        flags.push(
            CheatFlag::new(
                FlagKind::RandomGuess,
                Severity::High,
                format!(
                    "Same answer selected for {:.0}% of exact-choice questions (likely guessing)",
                    most_common_share * 100.0
                ),
                0.75,
            )
            .with_evidence("distribution", serde_json::json!(distribution))
            .with_evidence("most_common_pct", (most_common_share * 100.0).round() / 100.0),
        );
    }

    let correct = choices.iter().filter(|r| r.is_correct == Some(true)).count();
    let accuracy = correct as f64 / choices.len() as f64;
    if choices.len() >= MIN_QUESTIONS_FOR_ACCURACY && accuracy <= CHANCE_ACCURACY {
        flags.push(
            CheatFlag::new(
                FlagKind::RandomGuess,
                Severity::Medium,
                format!(
                    "Exact-choice accuracy ({:.0}%) is near random chance",
                    accuracy * 100.0
                ),
                0.6,
            )
            .with_evidence("accuracy", (accuracy * 100.0).round() / 100.0)
            .with_evidence("correct", correct)
            .with_evidence("total", choices.len()),
        );
    }

    flags
}
