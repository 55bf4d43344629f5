/// Test Runner - Fan-out and Grading
///
/// **Core Responsibility:**
/// Run one code submission against every test case of a question and turn the
/// raw engine outputs into `ExecutionOutcome`s.
///
/// **Guarantees:**
/// - Exactly one outcome per test case, in the original test case order
/// - Test cases run concurrently, bounded by `EXECUTION_POOL_SIZE`
/// - A failing, crashing or timed-out test case never affects its siblings
/// - Infrastructure errors become `sandbox_failure` outcomes, never panics
///
/// **Normalization Rules (all languages):**
/// - `\r\n` is treated as `\n`
/// - Leading and trailing whitespace is ignored
/// - Internal whitespace and case are significant

use crate::engine::{ExecutionEngine, TestExecutionOutput, MAX_SOURCE_CODE_BYTES, MAX_TEST_INPUT_BYTES};
use assay_common::config::EngineConfig;
use assay_common::types::{ExecutionOutcome, FailureKind, Language, TestCase};
use futures_util::stream::{self, StreamExt};
use std::time::Duration;
use tracing::{debug, error};

/// Normalize output string for comparison
pub fn normalize_output(output: &str) -> String {
    output.replace("\r\n", "\n").trim().to_string()
}

/// Longest prefix of `text` that fits in `max_bytes` without splitting a char.
pub fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

/// Grade a single raw output against its test case.
///
/// Priority: runtime error, then timeout, then output comparison.
pub fn grade_output(
    test_case: &TestCase,
    output: &TestExecutionOutput,
    timeout: Duration,
    config: &EngineConfig,
) -> ExecutionOutcome {
    let stdout = normalize_output(truncate_utf8(&output.stdout, config.max_captured_output_bytes));

    let failure = if output.runtime_error {
        let message = match (output.stderr.trim(), output.exit_code) {
            ("", Some(code)) => format!("Process exited with code {}", code),
            ("", None) => "Process failed".to_string(),
            (stderr, _) => stderr.to_string(),
        };
        Some((FailureKind::RuntimeError, message))
    } else if output.timed_out {
        Some((
            FailureKind::TimeLimitExceeded,
            format!("Time limit exceeded ({}s)", timeout.as_secs_f64()),
        ))
    } else if stdout == normalize_output(&test_case.expected_output) {
        None
    } else {
        Some((FailureKind::WrongAnswer, "Output did not match expected output".to_string()))
    };

    match failure {
        None => ExecutionOutcome::passed(test_case.index, stdout, output.execution_time_ms),
        Some((kind, message)) => {
            let mut outcome =
                ExecutionOutcome::failed(test_case.index, kind, truncate_utf8(&message, config.max_error_message_bytes));
            outcome.stdout = stdout;
            outcome.execution_time_ms = output.execution_time_ms;
            outcome
        }
    }
}

fn fail_all(test_cases: &[TestCase], kind: FailureKind, message: &str) -> Vec<ExecutionOutcome> {
    test_cases
        .iter()
        .map(|tc| ExecutionOutcome::failed(tc.index, kind, message))
        .collect()
}

async fn run_one(
    engine: &dyn ExecutionEngine,
    language: Language,
    source_code: &str,
    test_case: &TestCase,
    timeout: Duration,
    config: &EngineConfig,
) -> ExecutionOutcome {
    if test_case.input.len() > MAX_TEST_INPUT_BYTES {
        return ExecutionOutcome::failed(
            test_case.index,
            FailureKind::InputRejected,
            format!("Test input exceeds maximum size of {} bytes", MAX_TEST_INPUT_BYTES),
        );
    }

    match engine.execute(language, source_code, &test_case.input, timeout).await {
        Ok(output) => {
            let outcome = grade_output(test_case, &output, timeout, config);
            debug!(
                test_index = test_case.index,
                passed = outcome.passed,
                failure = ?outcome.failure,
                execution_ms = outcome.execution_time_ms,
                "Test result"
            );
            outcome
        }
        Err(e) => {
            error!(test_index = test_case.index, error = %e, "Sandbox execution failed");
            let message = format!("Sandbox error: {:#}", e);
            ExecutionOutcome::failed(
                test_case.index,
                FailureKind::SandboxFailure,
                truncate_utf8(&message, config.max_error_message_bytes),
            )
        }
    }
}

/// Execute `source_code` against every test case.
///
/// `language_tag` is the declared language of the answer. Empty submissions,
/// unknown or unconfigured languages and oversized sources short-circuit
/// without touching the engine.
pub async fn run_test_cases(
    engine: &dyn ExecutionEngine,
    language_tag: Option<&str>,
    source_code: &str,
    test_cases: &[TestCase],
    config: &EngineConfig,
) -> Vec<ExecutionOutcome> {
    if source_code.trim().is_empty() {
        return fail_all(test_cases, FailureKind::EmptySubmission, "Empty submission");
    }

    let language = match language_tag.and_then(Language::from_str) {
        Some(language) if engine.supports(language) => language,
        _ => {
            let message = format!("Unsupported language: {}", language_tag.unwrap_or("(none)"));
            return fail_all(test_cases, FailureKind::UnsupportedLanguage, &message);
        }
    };

    if source_code.len() > MAX_SOURCE_CODE_BYTES {
        let message = format!("Source code exceeds maximum size of {} bytes", MAX_SOURCE_CODE_BYTES);
        return fail_all(test_cases, FailureKind::InputRejected, &message);
    }

    let timeout = Duration::from_secs(config.execution_timeout_seconds);
    let pool = config.execution_pool_size.max(1);

    let mut indexed: Vec<(usize, ExecutionOutcome)> = stream::iter(test_cases.iter().enumerate())
        .map(|(position, test_case)| async move {
            let outcome = run_one(engine, language, source_code, test_case, timeout, config).await;
            (position, outcome)
        })
        .buffer_unordered(pool)
        .collect()
        .await;

    // Completion order is arbitrary; callers get test case order
    indexed.sort_by_key(|(position, _)| *position);
    indexed.into_iter().map(|(_, outcome)| outcome).collect()
}
