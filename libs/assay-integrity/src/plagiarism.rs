// Cross-candidate code similarity check
use crate::fingerprint::{edit_ratio, normalize_code, sketch, MinHashSketch};
use assay_common::config::EngineConfig;
use assay_common::types::{CheatFlag, FlagKind, Severity};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// MinHash estimates this far below the threshold still get an exact confirmation pass.
const CONFIRMATION_MARGIN: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PairSimilarity {
    pub minhash: f64,
    pub edit_ratio: Option<f64>,
}

impl PairSimilarity {
    /// The stronger of the two signals
    pub fn score(&self) -> f64 {
        self.edit_ratio.map_or(self.minhash, |ratio| ratio.max(self.minhash))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlagiarismCheck {
    pub flags: Vec<CheatFlag>,
    /// Highest pairwise similarity seen, 0.0 when nothing was comparable
    pub max_similarity: f64,
}

struct Prepared {
    normalized: String,
    sketch: MinHashSketch,
}

impl Prepared {
    fn new(code: &str) -> Option<Self> {
        let normalized = normalize_code(code);
        if normalized.is_empty() {
            return None;
        }
        let sketch = sketch(code);
        Some(Self { normalized, sketch })
    }

    fn compare(&self, other: &Prepared, exact: bool, threshold: f64) -> PairSimilarity {
        let minhash = self.sketch.similarity(&other.sketch);
        let confirm = exact || minhash >= threshold - CONFIRMATION_MARGIN;
        PairSimilarity {
            minhash,
            edit_ratio: confirm.then(|| edit_ratio(&self.normalized, &other.normalized)),
        }
    }
}

/// Compare two code texts with both metrics. Used by the cross-check endpoint and CLI.
pub fn compare(left: &str, right: &str) -> PairSimilarity {
    let left_norm = normalize_code(left);
    let right_norm = normalize_code(right);
    PairSimilarity {
        minhash: sketch(left).similarity(&sketch(right)),
        edit_ratio: Some(edit_ratio(&left_norm, &right_norm)),
    }
}

fn short_id(candidate_id: &str) -> String {
    candidate_id.chars().take(8).collect()
}

/// Compare one candidate's code against every other candidate of the same assessment.
///
/// `peers` is read-only and may include the candidate's own entry, which is skipped.
/// Empty submissions never participate. Every pair above the configured threshold
/// yields one `plagiarism` flag; above the critical threshold the flag is `critical`.
pub fn check(
    candidate_id: &str,
    own_code: &[String],
    peers: &BTreeMap<String, Vec<String>>,
    config: &EngineConfig,
) -> PlagiarismCheck {
    let mine: Vec<Prepared> = own_code.iter().filter_map(|c| Prepared::new(c)).collect();
    if mine.is_empty() {
        return PlagiarismCheck::default();
    }

    let others: Vec<(&str, Prepared)> = peers
        .iter()
        .filter(|(id, _)| id.as_str() != candidate_id)
        .flat_map(|(id, codes)| codes.iter().filter_map(move |c| Prepared::new(c).map(|p| (id.as_str(), p))))
        .collect();

    // Small corpora get an exact comparison for every pair
    let exact = others.len() <= config.exact_compare_limit;
    let threshold = config.plagiarism_threshold;

    let mut result = PlagiarismCheck::default();
    for (own_index, own) in mine.iter().enumerate() {
        for (other_id, other) in &others {
            let similarity = own.compare(other, exact, threshold);
            let score = similarity.score();
            result.max_similarity = result.max_similarity.max(score);

            if score > threshold {
                let severity = if score > config.plagiarism_critical_threshold {
                    Severity::Critical
                } else {
                    Severity::High
                };
                debug!(
                    candidate_id = %candidate_id,
                    other_candidate = %other_id,
                    similarity = score,
                    "Plagiarism pair above threshold"
                );
                let mut flag = CheatFlag::new(
                    FlagKind::Plagiarism,
                    severity,
                    format!(
                        "Code similarity of {:.1}% with candidate {}...",
                        score * 100.0,
                        short_id(other_id)
                    ),
                    0.9,
                )
                .with_evidence("similarity", round3(score))
                .with_evidence("minhash_similarity", round3(similarity.minhash))
                .with_evidence("other_candidate", short_id(other_id))
                .with_evidence("submission_index", own_index)
                .with_evidence("threshold", threshold);
                if let Some(ratio) = similarity.edit_ratio {
                    flag = flag.with_evidence("edit_ratio", round3(ratio));
                }
                result.flags.push(flag);
            }
        }
    }
    result
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
