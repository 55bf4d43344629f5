// Engine configuration shared by the worker, API and CLI
use crate::types::Language;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("failed to read language config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse language config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("language config: {0}")]
    Languages(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// Local Ollama `/api/generate`
    Ollama,
    /// Any OpenAI-compatible `/chat/completions` endpoint (Groq, vLLM, ...)
    OpenAi,
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(LlmProvider::Ollama),
            "openai" | "groq" => Ok(LlmProvider::OpenAi),
            other => Err(format!("unknown provider '{}', expected ollama or openai", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub base_url: String,
    pub model: String,
    pub coding_model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            coding_model: "llama3".to_string(),
            api_key: None,
            timeout_seconds: 60,
            max_retries: 5,
        }
    }
}

/// Thresholds and policy constants of the evaluation and integrity engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub plagiarism_threshold: f64,
    pub plagiarism_critical_threshold: f64,
    pub min_seconds_per_question: f64,
    /// Fraction in [0,1]; the resume match score (0-100) is compared against this x 100.
    pub resume_mismatch_threshold: f64,
    pub execution_timeout_seconds: u64,
    pub execution_pool_size: usize,
    pub max_captured_output_bytes: usize,
    pub max_error_message_bytes: usize,
    /// Share of a code question's points decided by test execution.
    pub execution_score_weight: f64,
    /// Below this many peer submissions every pair is also compared by edit ratio.
    pub exact_compare_limit: usize,
    pub llm: LlmSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            plagiarism_threshold: 0.85,
            plagiarism_critical_threshold: 0.95,
            min_seconds_per_question: 5.0,
            resume_mismatch_threshold: 0.4,
            execution_timeout_seconds: 10,
            execution_pool_size: 4,
            max_captured_output_bytes: 64 * 1024,
            max_error_message_bytes: 500,
            execution_score_weight: 0.6,
            exact_compare_limit: 50,
            llm: LlmSettings::default(),
        }
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        _ => Ok(default),
    }
}

fn check_fraction(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "must lie in [0, 1]".to_string(),
        });
    }
    Ok(())
}

fn check_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "must be a positive finite number".to_string(),
        });
    }
    Ok(())
}

impl EngineConfig {
    /// Load from process environment. Call `dotenvy::dotenv()` first to honour `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load from an arbitrary variable source, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = EngineConfig::default();
        let llm_defaults = LlmSettings::default();

        let llm = LlmSettings {
            provider: parse_var(&lookup, "LLM_PROVIDER", llm_defaults.provider)?,
            base_url: lookup("LLM_BASE_URL").unwrap_or(llm_defaults.base_url),
            model: lookup("LLM_MODEL").unwrap_or(llm_defaults.model),
            coding_model: lookup("LLM_CODING_MODEL").unwrap_or(llm_defaults.coding_model),
            api_key: lookup("LLM_API_KEY").filter(|k| !k.trim().is_empty()),
            timeout_seconds: parse_var(&lookup, "LLM_TIMEOUT_SECONDS", llm_defaults.timeout_seconds)?,
            max_retries: parse_var(&lookup, "LLM_MAX_RETRIES", llm_defaults.max_retries)?,
        };

        let config = EngineConfig {
            plagiarism_threshold: parse_var(&lookup, "PLAGIARISM_THRESHOLD", defaults.plagiarism_threshold)?,
            plagiarism_critical_threshold: parse_var(
                &lookup,
                "PLAGIARISM_CRITICAL_THRESHOLD",
                defaults.plagiarism_critical_threshold,
            )?,
            min_seconds_per_question: parse_var(
                &lookup,
                "MIN_TIME_PER_QUESTION_SECONDS",
                defaults.min_seconds_per_question,
            )?,
            resume_mismatch_threshold: parse_var(
                &lookup,
                "RESUME_MISMATCH_THRESHOLD",
                defaults.resume_mismatch_threshold,
            )?,
            execution_timeout_seconds: parse_var(
                &lookup,
                "MAX_CODE_EXECUTION_TIME_SECONDS",
                defaults.execution_timeout_seconds,
            )?,
            execution_pool_size: parse_var(&lookup, "EXECUTION_POOL_SIZE", defaults.execution_pool_size)?,
            max_captured_output_bytes: parse_var(
                &lookup,
                "MAX_CAPTURED_OUTPUT_BYTES",
                defaults.max_captured_output_bytes,
            )?,
            max_error_message_bytes: parse_var(
                &lookup,
                "MAX_ERROR_MESSAGE_BYTES",
                defaults.max_error_message_bytes,
            )?,
            execution_score_weight: parse_var(
                &lookup,
                "EXECUTION_SCORE_WEIGHT",
                defaults.execution_score_weight,
            )?,
            exact_compare_limit: parse_var(&lookup, "EXACT_COMPARE_LIMIT", defaults.exact_compare_limit)?,
            llm,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_fraction("PLAGIARISM_THRESHOLD", self.plagiarism_threshold)?;
        check_fraction("PLAGIARISM_CRITICAL_THRESHOLD", self.plagiarism_critical_threshold)?;
        if self.plagiarism_critical_threshold < self.plagiarism_threshold {
            return Err(ConfigError::Invalid {
                name: "PLAGIARISM_CRITICAL_THRESHOLD",
                value: self.plagiarism_critical_threshold.to_string(),
                reason: "must not be below PLAGIARISM_THRESHOLD".to_string(),
            });
        }
        check_fraction("RESUME_MISMATCH_THRESHOLD", self.resume_mismatch_threshold)?;
        check_fraction("EXECUTION_SCORE_WEIGHT", self.execution_score_weight)?;
        check_positive("MIN_TIME_PER_QUESTION_SECONDS", self.min_seconds_per_question)?;
        check_positive("MAX_CODE_EXECUTION_TIME_SECONDS", self.execution_timeout_seconds as f64)?;
        check_positive("EXECUTION_POOL_SIZE", self.execution_pool_size as f64)?;
        check_positive("MAX_CAPTURED_OUTPUT_BYTES", self.max_captured_output_bytes as f64)?;
        check_positive("MAX_ERROR_MESSAGE_BYTES", self.max_error_message_bytes as f64)?;
        check_positive("LLM_TIMEOUT_SECONDS", self.llm.timeout_seconds as f64)?;
        if self.llm.provider == LlmProvider::OpenAi && self.llm.api_key.is_none() {
            return Err(ConfigError::Missing("LLM_API_KEY"));
        }
        Ok(())
    }
}

/// Sandbox settings for one allow-listed language, as stored in `config/languages.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub version: String,
    pub image: String,
    /// File the submission is written to inside the sandbox
    pub source_file: String,
    #[serde(default)]
    pub compile: Option<String>,
    pub run: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,
}

fn default_pids_limit() -> i64 {
    64
}

impl LanguageConfig {
    pub fn language(&self) -> Option<Language> {
        Language::from_str(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguagesFile {
    pub languages: Vec<LanguageConfig>,
}

impl LanguagesFile {
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let file: LanguagesFile = serde_json::from_str(content)?;
        if file.languages.is_empty() {
            return Err(ConfigError::Languages("no languages configured".to_string()));
        }
        for lang in &file.languages {
            if lang.language().is_none() {
                return Err(ConfigError::Languages(format!("unknown language '{}'", lang.name)));
            }
        }
        Ok(file)
    }
}
