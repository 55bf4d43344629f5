use assay_common::types::{CheatFlag, FlagKind, Severity};

/// Share of fast answers above which the timing flag fires
const FAST_SHARE_FLAG: f64 = 0.3;
/// Share of fast answers above which the timing flag is critical
const FAST_SHARE_CRITICAL: f64 = 0.5;
const MIN_SAMPLES_FOR_DISPERSION: usize = 5;
const BOT_CV_THRESHOLD: f64 = 0.1;
/// Consecutive answers differing by more than this factor look like a lookup
const SPEED_JUMP_RATIO: f64 = 10.0;

const FAST_ANSWER_POINTS: f64 = 40.0;
const BOT_PATTERN_POINTS: f64 = 30.0;
const SPEED_JUMP_POINTS: f64 = 5.0;

#[derive(Debug, Clone, Default)]
pub struct TimingCheck {
    pub flags: Vec<CheatFlag>,
    /// 0-100, higher is more anomalous
    pub anomaly_score: f64,
}

/// Population coefficient of variation. Zero mean yields 0.0.
pub fn coefficient_of_variation(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = samples.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean
}

/// Inspect per-question elapsed seconds, in question order.
pub fn check(timings: &[f64], min_seconds: f64) -> TimingCheck {
    let mut result = TimingCheck::default();
    if timings.is_empty() {
        return result;
    }

    let total = timings.len();
    let fast = timings.iter().filter(|&&t| t < min_seconds).count();
    if fast as f64 > total as f64 * FAST_SHARE_FLAG {
        let severity = if fast as f64 > total as f64 * FAST_SHARE_CRITICAL {
            Severity::Critical
        } else {
            Severity::High
        };
        result.flags.push(
            CheatFlag::new(
                FlagKind::TimingAnomaly,
                severity,
                format!("{}/{} questions answered in under {}s", fast, total, min_seconds),
                0.85,
            )
            .with_evidence("fast_answers", fast)
            .with_evidence("total", total)
            .with_evidence("threshold_seconds", min_seconds),
        );
        result.anomaly_score += FAST_ANSWER_POINTS;
    }

    // Uniform timing across distinct questions is suspicious regardless of speed
    if total >= MIN_SAMPLES_FOR_DISPERSION {
        let cv = coefficient_of_variation(timings);
        if cv < BOT_CV_THRESHOLD {
            let mean = timings.iter().sum::<f64>() / total as f64;
            result.flags.push(
                CheatFlag::new(
                    FlagKind::BotPattern,
                    Severity::High,
                    "Suspiciously uniform response times (possible bot)",
                    0.7,
                )
                .with_evidence("coefficient_of_variation", (cv * 10000.0).round() / 10000.0)
                .with_evidence("avg_time", (mean * 10.0).round() / 10.0)
                .with_evidence("samples", total),
            );
            result.anomaly_score += BOT_PATTERN_POINTS;
        }
    }

    for pair in timings.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if prev > 0.0 && next > 0.0 && prev.max(next) / prev.min(next) > SPEED_JUMP_RATIO {
            result.anomaly_score += SPEED_JUMP_POINTS;
        }
    }

    result.anomaly_score = result.anomaly_score.min(100.0);
    result
}
