// CLI commands for working with fingerprints and integrity reports
use anyhow::{bail, Context, Result};
use assay_common::config::{EngineConfig, LanguagesFile};
use assay_common::types::{Answer, CheatFlag, EvaluationResult, IntegrityReport, Question};
use assay_integrity::fingerprint::{self, NUM_PERMUTATIONS, SHINGLE_SIZE};
use assay_integrity::plagiarism::{self, PairSimilarity};
use assay_integrity::report::{evaluate_integrity, IntegrityInput, ResumeSignal};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Everything the integrity pipeline needs, as exported by the persistence layer
#[derive(Debug, Deserialize)]
pub struct IntegrityBundle {
    pub evaluation: EvaluationResult,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub answers: Vec<Answer>,
    #[serde(default)]
    pub peers: BTreeMap<String, Vec<String>>,
    /// Result of an earlier resume check, if one was run
    #[serde(default)]
    pub resume_match_score: Option<f64>,
    #[serde(default)]
    pub resume_flags: Vec<CheatFlag>,
}

fn read_source(path: &Path) -> Result<String> {
    if !path.exists() {
        bail!("File not found: {}", path.display());
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

pub fn sketch_json(code: &str) -> serde_json::Value {
    let sketch = fingerprint::sketch(code);
    json!({
        "num_permutations": NUM_PERMUTATIONS,
        "shingle_size": SHINGLE_SIZE,
        "degenerate": sketch.is_degenerate(),
        "slots": sketch.slots,
    })
}

pub fn describe_similarity(pair: &PairSimilarity, threshold: f64) -> String {
    let mut lines = vec![format!("MinHash similarity: {:.3}", pair.minhash)];
    if let Some(ratio) = pair.edit_ratio {
        lines.push(format!("Edit ratio:         {:.3}", ratio));
    }
    let verdict = if pair.score() > threshold {
        "ABOVE plagiarism threshold"
    } else {
        "below plagiarism threshold"
    };
    lines.push(format!("Similarity:         {:.3} ({} {:.2})", pair.score(), verdict, threshold));
    lines.join("\n")
}

pub fn run_integrity(bundle: IntegrityBundle, config: &EngineConfig) -> IntegrityReport {
    let input = IntegrityInput {
        evaluation: &bundle.evaluation,
        questions: &bundle.questions,
        answers: &bundle.answers,
        peers: &bundle.peers,
        resume: ResumeSignal {
            flags: bundle.resume_flags.clone(),
            match_score: bundle.resume_match_score,
        },
    };
    evaluate_integrity(input, config)
}

pub fn describe_languages(file: &LanguagesFile) -> String {
    let mut lines = vec![format!("{:<12} {:<10} {:<32} {:>8} {:>5}", "LANGUAGE", "VERSION", "IMAGE", "MEMORY", "CPU")];
    for lang in &file.languages {
        lines.push(format!(
            "{:<12} {:<10} {:<32} {:>6}MB {:>5}{}",
            lang.name,
            lang.version,
            lang.image,
            lang.memory_limit_mb,
            lang.cpu_limit,
            if lang.compile.is_some() { "  (compiled)" } else { "" }
        ));
    }
    lines.join("\n")
}

/// Print the sketch of a file
pub fn fingerprint(file: &Path) -> Result<()> {
    let code = read_source(file)?;
    println!("{}", serde_json::to_string_pretty(&sketch_json(&code))?);
    Ok(())
}

/// Compare two files
pub fn compare(left: &Path, right: &Path) -> Result<()> {
    let left_code = read_source(left)?;
    let right_code = read_source(right)?;
    let config = EngineConfig::from_env().context("Invalid engine configuration")?;

    println!("🔍 {} ↔ {}", left.display(), right.display());
    println!("{}", describe_similarity(&plagiarism::compare(&left_code, &right_code), config.plagiarism_threshold));
    Ok(())
}

/// Replay the integrity pipeline over an exported bundle and print the report
pub fn integrity(input: &Path) -> Result<()> {
    let content = read_source(input)?;
    let bundle: IntegrityBundle =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse bundle {}", input.display()))?;
    let config = EngineConfig::from_env().context("Invalid engine configuration")?;

    let report = run_integrity(bundle, &config);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub fn list_languages(config_path: &Path) -> Result<()> {
    let content = read_source(config_path)?;
    let file = LanguagesFile::parse(&content).context("Failed to parse languages.json")?;

    println!("📋 Configured languages ({}):", file.languages.len());
    println!("{}", describe_languages(&file));
    Ok(())
}
