use assay_common::types::{CheatFlag, FlagKind, Severity};
use lazy_static::lazy_static;
use regex::Regex;

/// More fence delimiters than this suggests pasted markdown
const MAX_CODE_FENCES: usize = 2;

lazy_static! {
    static ref MARKUP_TAG: Regex = Regex::new(r"<[a-z]+[^>]*>").unwrap();
    static ref ATTRIBUTION: Regex =
        Regex::new(r"(?i)(according to|source:|reference:|from \S+\.com)").unwrap();
}

/// Scan free-text answers, given as `(question_id, text)`, for lexical paste markers.
///
/// These are weak signals: markup and fences yield `medium`, attribution phrases `low`.
pub fn check(responses: &[(&str, &str)]) -> Vec<CheatFlag> {
    let mut flags = Vec::new();

    for &(question_id, text) in responses {
        if text.trim().is_empty() {
            continue;
        }

        let has_markup = MARKUP_TAG.is_match(text);
        let fences = text.matches("```").count();
        if has_markup || fences > MAX_CODE_FENCES {
            flags.push(
                CheatFlag::new(
                    FlagKind::CopyPaste,
                    Severity::Medium,
                    format!(
                        "Answer to {} contains formatting suggesting copy-paste from an external source",
                        question_id
                    ),
                    0.5,
                )
                .with_evidence("question_id", question_id)
                .with_evidence("has_html", has_markup)
                .with_evidence("code_blocks", fences),
            );
        }

        if let Some(found) = ATTRIBUTION.find(text) {
            flags.push(
                CheatFlag::new(
                    FlagKind::CopyPaste,
                    Severity::Low,
                    format!("Answer to {} contains external references", question_id),
                    0.4,
                )
                .with_evidence("question_id", question_id)
                .with_evidence("marker", found.as_str()),
            );
        }
    }

    flags
}
