/// Integrity Scorer - Flags to Verdict
///
/// **Core Responsibility:**
/// Reduce an accumulated flag set plus two numeric signals to a 0-100
/// integrity score and a discrete recommendation.
///
/// **Reduction:**
/// - Start at 100, subtract a fixed penalty per flag by severity
/// - Resume match below 50 costs `(50 - match) * 0.3`, at most 15
/// - Plagiarism score above the threshold costs a flat 30
/// - Clamp to [0, 100]
///
/// Every function here is pure. Adding a flag or worsening a signal can only
/// lower the score.

use assay_common::types::{CheatFlag, Recommendation, Severity};

pub const PERFECT_SCORE: f64 = 100.0;
const RESUME_PENALTY_FLOOR: f64 = 50.0;
const RESUME_PENALTY_RATE: f64 = 0.3;
const PLAGIARISM_PENALTY: f64 = 30.0;
const REJECT_BELOW: f64 = 30.0;
const REVIEW_BELOW: f64 = 60.0;

pub fn severity_penalty(severity: Severity) -> f64 {
    match severity {
        Severity::Low => 5.0,
        Severity::Medium => 10.0,
        Severity::High => 20.0,
        Severity::Critical => 35.0,
    }
}

/// `resume_match` is on the 0-100 scale.
pub fn integrity_score(
    flags: &[CheatFlag],
    resume_match: Option<f64>,
    plagiarism_score: f64,
    plagiarism_threshold: f64,
) -> f64 {
    let mut score = PERFECT_SCORE;

    for flag in flags {
        score -= severity_penalty(flag.severity);
    }

    if let Some(matched) = resume_match {
        // Below 0 the rate would exceed the 15 point cap
        let matched = matched.max(0.0);
        if matched < RESUME_PENALTY_FLOOR {
            score -= (RESUME_PENALTY_FLOOR - matched) * RESUME_PENALTY_RATE;
        }
    }

    if plagiarism_score > plagiarism_threshold {
        score -= PLAGIARISM_PENALTY;
    }

    score.clamp(0.0, PERFECT_SCORE)
}

pub fn is_flagged(flags: &[CheatFlag]) -> bool {
    flags.iter().any(|f| f.severity >= Severity::High)
}

/// Returns `(flagged, recommendation)`.
pub fn recommend(flags: &[CheatFlag], score: f64) -> (bool, Recommendation) {
    let flagged = is_flagged(flags);
    let recommendation = match (flagged, score) {
        (true, s) if s < REJECT_BELOW => Recommendation::Reject,
        (true, _) => Recommendation::Review,
        (false, s) if s < REVIEW_BELOW => Recommendation::Review,
        (false, _) => Recommendation::Clear,
    };
    (flagged, recommendation)
}

pub fn summarize(flags: &[CheatFlag], score: f64) -> String {
    if flags.is_empty() {
        return "No integrity concerns detected. Candidate appears genuine.".to_string();
    }

    let critical = flags.iter().filter(|f| f.severity == Severity::Critical).count();
    let high = flags.iter().filter(|f| f.severity == Severity::High).count();

    if critical > 0 {
        format!(
            "CRITICAL: {} critical integrity issues detected. Integrity score: {:.0}/100. Manual review strongly recommended.",
            critical, score
        )
    } else if high > 0 {
        format!(
            "WARNING: {} high-severity flags detected. Integrity score: {:.0}/100. Review recommended.",
            high, score
        )
    } else {
        format!(
            "Minor concerns: {} low/medium flags. Integrity score: {:.0}/100.",
            flags.len(),
            score
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assay_common::types::FlagKind;

    fn flag(severity: Severity) -> CheatFlag {
        CheatFlag::new(FlagKind::TimingAnomaly, severity, "test", 0.5)
    }

    #[test]
    fn test_clean_candidate() {
        let score = integrity_score(&[], None, 0.0, 0.85);
        assert_eq!(score, 100.0);
        assert_eq!(recommend(&[], score), (false, Recommendation::Clear));
        assert!(summarize(&[], score).starts_with("No integrity concerns"));
    }

    #[test]
    fn test_severity_penalties() {
        let flags = vec![
            flag(Severity::Low),
            flag(Severity::Medium),
            flag(Severity::High),
            flag(Severity::Critical),
        ];
        assert_eq!(integrity_score(&flags, None, 0.0, 0.85), 30.0);
    }

    #[test]
    fn test_score_never_leaves_range() {
        let flags = vec![flag(Severity::Critical); 10];
        assert_eq!(integrity_score(&flags, Some(0.0), 1.0, 0.85), 0.0);
        assert_eq!(integrity_score(&[], Some(100.0), 0.0, 0.85), 100.0);
    }

    #[test]
    fn test_resume_penalty_is_capped() {
        assert_eq!(integrity_score(&[], Some(40.0), 0.0, 0.85), 97.0);
        assert_eq!(integrity_score(&[], Some(0.0), 0.0, 0.85), 85.0);
        assert_eq!(integrity_score(&[], Some(-20.0), 0.0, 0.85), 85.0);
        assert_eq!(integrity_score(&[], Some(50.0), 0.0, 0.85), 100.0);
    }

    #[test]
    fn test_plagiarism_penalty_above_threshold_only() {
        assert_eq!(integrity_score(&[], None, 0.85, 0.85), 100.0);
        assert_eq!(integrity_score(&[], None, 0.86, 0.85), 70.0);
    }

    #[test]
    fn test_score_is_monotone_in_flags() {
        let severities = [Severity::Low, Severity::Critical, Severity::Medium, Severity::High, Severity::Low];
        let mut flags = Vec::new();
        let mut previous = integrity_score(&flags, Some(45.0), 0.5, 0.85);
        for severity in severities {
            flags.push(flag(severity));
            let current = integrity_score(&flags, Some(45.0), 0.5, 0.85);
            assert!(current <= previous);
            previous = current;
        }

        // Raising the severity of one flag never helps
        for (lower, higher) in [(Severity::Low, Severity::Medium), (Severity::High, Severity::Critical)] {
            let low = integrity_score(&[flag(lower)], None, 0.0, 0.85);
            let high = integrity_score(&[flag(higher)], None, 0.0, 0.85);
            assert!(high <= low);
        }
    }

    #[test]
    fn test_recommendation_state_machine() {
        let high = vec![flag(Severity::High)];
        assert_eq!(recommend(&high, 29.9), (true, Recommendation::Reject));
        assert_eq!(recommend(&high, 30.0), (true, Recommendation::Review));
        assert_eq!(recommend(&high, 80.0), (true, Recommendation::Review));

        let medium = vec![flag(Severity::Medium)];
        assert_eq!(recommend(&medium, 59.0), (false, Recommendation::Review));
        assert_eq!(recommend(&medium, 60.0), (false, Recommendation::Clear));
        assert_eq!(recommend(&medium, 10.0), (false, Recommendation::Review));
    }

    #[test]
    fn test_summary_wording() {
        let critical = vec![flag(Severity::Critical), flag(Severity::Low)];
        assert!(summarize(&critical, 60.0).starts_with("CRITICAL: 1 critical"));

        let high = vec![flag(Severity::High), flag(Severity::High)];
        assert_eq!(
            summarize(&high, 60.0),
            "WARNING: 2 high-severity flags detected. Integrity score: 60/100. Review recommended."
        );

        let minor = vec![flag(Severity::Low), flag(Severity::Medium)];
        assert_eq!(summarize(&minor, 85.0), "Minor concerns: 2 low/medium flags. Integrity score: 85/100.");
    }
}
