/// Execution Engine - Sandboxed Code Execution
///
/// **Core Responsibility:**
/// Run one submission against one input in a fresh, locked-down container and
/// return the raw outputs.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (Docker today, anything behind `ExecutionEngine`)
/// - Engine does NOT know scoring rules
/// - Engine does NOT compare outputs; `runner` grades what comes back
///
/// **Sandbox Rules (every execution):**
/// 1. Fresh container per call, removed by `ContainerGuard` on every exit path
/// 2. Network disabled, all capabilities dropped, `no-new-privileges`
/// 3. Memory, CPU and pids limits from `config/languages.json`
/// 4. Read-only root filesystem; the only writable path is a size-limited tmpfs
/// 5. Runs as `nobody` with an empty environment; source and input arrive on stdin
/// 6. Hard wall-clock timeout, container killed when it fires
/// 7. stdout/stderr capture stops at a fixed byte budget

use crate::config::LanguageConfigManager;
use anyhow::{bail, Context, Result};
use assay_common::config::{EngineConfig, LanguageConfig};
use assay_common::types::Language;
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    KillContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Safety limits to prevent pathological inputs from reaching Docker
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB

const SANDBOX_DIR: &str = "/sandbox";
const SANDBOX_USER: &str = "65534:65534";
const SANDBOX_TMPFS: &str = "rw,exec,nosuid,nodev,size=64m,mode=1777";
const SCRATCH_TMPFS: &str = "rw,noexec,nosuid,nodev,size=16m,mode=1777";

const OOM_EXIT_CODE: i64 = 137;
const SEGFAULT_EXIT_CODE: i64 = 139;

/// Raw execution output for a single test case.
/// Produced by an `ExecutionEngine`, graded by `runner`.
#[derive(Debug, Clone, Default)]
pub struct TestExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
    pub timed_out: bool,
    pub runtime_error: bool,
    pub exit_code: Option<i64>,
    pub output_truncated: bool,
}

/// Anything that can run untrusted code for the evaluator.
///
/// `Err` is reserved for infrastructure failures (daemon unreachable, image
/// missing). Crashes, non-zero exits and timeouts of the submission itself are
/// reported inside `TestExecutionOutput`.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    fn supports(&self, language: Language) -> bool;

    async fn execute(
        &self,
        language: Language,
        source_code: &str,
        input: &str,
        timeout: Duration,
    ) -> Result<TestExecutionOutput>;
}

/// Container cleanup guard - guarantees container removal on drop
/// This ensures containers are cleaned up even if execution panics or is cancelled
struct ContainerGuard {
    docker: Docker,
    container_id: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        // Drop cannot be async, so removal is handed to the runtime
        let container_id = std::mem::take(&mut self.container_id);
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to clean up container");
            }
        });
    }
}

/// Append at most `limit - buf.len()` bytes of `chunk`, cutting on a char boundary.
/// Returns true when something was dropped.
fn append_bounded(buf: &mut String, chunk: &[u8], limit: usize) -> bool {
    let text = String::from_utf8_lossy(chunk);
    let room = limit.saturating_sub(buf.len());
    if text.len() <= room {
        buf.push_str(&text);
        return false;
    }
    let mut cut = room;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    buf.push_str(&text[..cut]);
    true
}

/// Bytes written to the container's stdin: the source immediately followed by the test input.
fn stdin_payload(source_code: &str, input: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(source_code.len() + input.len());
    payload.extend_from_slice(source_code.as_bytes());
    payload.extend_from_slice(input.as_bytes());
    payload
}

/// Shell line run inside the container: spool stdin, split it, optionally compile, exec.
///
/// busybox `head` reads ahead through stdio, so stdin is spooled to a file
/// and split there.
fn launch_script(lang: &LanguageConfig, source_bytes: usize) -> String {
    let mut script = format!(
        "cd {dir} && cat > payload \
         && head -c {source_bytes} payload > {file} \
         && tail -c +{input_offset} payload > input.txt \
         && rm payload",
        dir = SANDBOX_DIR,
        file = lang.source_file,
        input_offset = source_bytes + 1,
    );
    if let Some(compile) = &lang.compile {
        // Compiler diagnostics belong on stderr
        script.push_str(&format!(" && {} 1>&2", compile));
    }
    script.push_str(&format!(" && exec {} < input.txt", lang.run));
    script
}

/// Write the payload and close stdin so `cat` inside the container sees EOF.
async fn feed_stdin<W: AsyncWrite + Unpin>(mut stdin: W, payload: &[u8]) -> std::io::Result<()> {
    stdin.write_all(payload).await?;
    stdin.flush().await?;
    stdin.shutdown().await
}

fn host_config(lang: &LanguageConfig) -> HostConfig {
    let memory = (lang.memory_limit_mb as i64) * 1024 * 1024;
    let mut tmpfs = HashMap::new();
    tmpfs.insert(SANDBOX_DIR.to_string(), SANDBOX_TMPFS.to_string());
    tmpfs.insert("/tmp".to_string(), SCRATCH_TMPFS.to_string());

    HostConfig {
        memory: Some(memory),
        // Equal to memory: no swap on top of the limit
        memory_swap: Some(memory),
        nano_cpus: Some((lang.cpu_limit as f64 * 1_000_000_000.0) as i64),
        pids_limit: Some(lang.pids_limit),
        network_mode: Some("none".to_string()),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges".to_string()]),
        readonly_rootfs: Some(true),
        tmpfs: Some(tmpfs),
        ..Default::default()
    }
}

/// Docker-based execution engine for real sandboxed code execution
pub struct DockerEngine {
    docker: Docker,
    languages: LanguageConfigManager,
    permits: Arc<Semaphore>,
    max_output_bytes: usize,
}

impl DockerEngine {
    pub fn new(languages: LanguageConfigManager, config: &EngineConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;

        Ok(DockerEngine {
            docker,
            languages,
            permits: Arc::new(Semaphore::new(config.execution_pool_size.max(1))),
            max_output_bytes: config.max_captured_output_bytes,
        })
    }

    /// Fail fast at startup when the daemon is not answering
    pub async fn verify(&self) -> Result<()> {
        self.docker.ping().await.context("Docker daemon did not answer ping")?;
        Ok(())
    }

    /// Ensure Docker image is available (pull if needed)
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    /// Pre-pull every configured image so the first submission does not pay for it
    pub async fn warm_images(&self) {
        for language in self.languages.list_languages() {
            if let Ok(lang) = self.languages.get_config(language) {
                if let Err(e) = self.ensure_image(&lang.image).await {
                    warn!(language = %language, error = %e, "Could not pre-pull image");
                }
            }
        }
    }

    async fn collect_output(&self, container_id: &str) -> (String, String, Option<i64>, bool) {
        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut truncated = false;

        let logs_options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        });

        // Keep draining after the budget is spent so the container never blocks on a full pipe
        let mut logs_stream = self.docker.logs(container_id, logs_options);
        while let Some(output) = logs_stream.next().await {
            match output {
                Ok(LogOutput::StdOut { message }) => {
                    truncated |= append_bounded(&mut stdout, &message, self.max_output_bytes);
                }
                Ok(LogOutput::StdErr { message }) => {
                    truncated |= append_bounded(&mut stderr, &message, self.max_output_bytes);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(container_id = %container_id, error = %e, "Error reading container logs");
                    break;
                }
            }
        }

        let wait_options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut wait_stream = self.docker.wait_container(container_id, Some(wait_options));
        let exit_code = match wait_stream.next().await {
            Some(Ok(response)) => Some(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
            Some(Err(e)) => {
                warn!(container_id = %container_id, error = %e, "Failed to get container exit code");
                None
            }
            None => None,
        };

        (stdout, stderr, exit_code, truncated)
    }
}

#[async_trait]
impl ExecutionEngine for DockerEngine {
    fn supports(&self, language: Language) -> bool {
        self.languages.supports(language)
    }

    /// Execute code in a Docker container with hardened safety guarantees
    ///
    /// - Input validation: rejects oversized source code or test inputs
    /// - Hard timeout: enforced via tokio::time::timeout, kills container on timeout
    /// - Guaranteed cleanup: container removed even on panic/cancellation via Drop guard
    async fn execute(
        &self,
        language: Language,
        source_code: &str,
        input: &str,
        timeout: Duration,
    ) -> Result<TestExecutionOutput> {
        if source_code.len() > MAX_SOURCE_CODE_BYTES {
            bail!("Source code exceeds maximum size of {} bytes", MAX_SOURCE_CODE_BYTES);
        }
        if input.len() > MAX_TEST_INPUT_BYTES {
            bail!("Test input exceeds maximum size of {} bytes", MAX_TEST_INPUT_BYTES);
        }

        let lang = self.languages.get_config(language)?;
        let _permit = self.permits.acquire().await.context("Execution pool closed")?;

        self.ensure_image(&lang.image)
            .await
            .with_context(|| format!("Failed to ensure Docker image '{}' is available", lang.image))?;

        let container_name = format!("assay-{}", uuid::Uuid::new_v4());
        let payload = stdin_payload(source_code, input);

        let config = Config {
            image: Some(lang.image.clone()),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                launch_script(lang, source_code.len()),
            ]),
            user: Some(SANDBOX_USER.to_string()),
            working_dir: Some(SANDBOX_DIR.to_string()),
            // stdin stays open until the single attached writer closes it
            open_stdin: Some(true),
            stdin_once: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(host_config(lang)),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .context("Failed to create Docker container")?;

        // Set up the guard before anything else can fail
        let _guard = ContainerGuard {
            docker: self.docker.clone(),
            container_id: container.id.clone(),
        };
        let container_id = container.id;

        // Attach before start so no stdin byte can be missed
        let attach_options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stream: Some(true),
            ..Default::default()
        };
        let AttachContainerResults { input: stdin, .. } = self
            .docker
            .attach_container(&container_id, Some(attach_options))
            .await
            .context("Failed to attach to container stdin")?;

        let start_time = Instant::now();

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")?;

        let mut output = TestExecutionOutput::default();

        let run = async {
            let (fed, collected) = tokio::join!(feed_stdin(stdin, &payload), self.collect_output(&container_id));
            if let Err(e) = fed {
                warn!(container_id = %container_id, error = %e, "Failed to deliver payload over stdin");
            }
            collected
        };

        match tokio::time::timeout(timeout, run).await {
            Ok((stdout, mut stderr, exit_code, truncated)) => {
                output.exit_code = exit_code;
                output.output_truncated = truncated;
                match exit_code {
                    Some(0) => {}
                    Some(code) => {
                        output.runtime_error = true;
                        if code == OOM_EXIT_CODE {
                            stderr.push_str("\n[Container killed: likely OOM or exceeded memory limit]");
                        } else if code == SEGFAULT_EXIT_CODE {
                            stderr.push_str("\n[Container killed: segmentation fault]");
                        }
                    }
                    None => {
                        output.runtime_error = true;
                        stderr.push_str("\n[Exit status unavailable]");
                    }
                }
                output.stdout = stdout;
                output.stderr = stderr;
            }
            Err(_) => {
                output.timed_out = true;
                warn!(
                    container_id = %container_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Execution timed out, killing container"
                );

                if let Err(e) = self
                    .docker
                    .kill_container(&container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container_id = %container_id, error = %e, "Failed to kill timed-out container");
                }
                output.stderr = "[Execution timed out]".to_string();
            }
        }

        output.execution_time_ms = start_time.elapsed().as_millis() as u64;
        debug!(
            language = %language,
            execution_ms = output.execution_time_ms,
            exit_code = ?output.exit_code,
            timed_out = output.timed_out,
            "Container finished"
        );

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python() -> LanguageConfig {
        LanguageConfig {
            name: "python".to_string(),
            version: "3.12".to_string(),
            image: "python:3.12-alpine".to_string(),
            source_file: "main.py".to_string(),
            compile: None,
            run: "python3 -u main.py".to_string(),
            memory_limit_mb: 256,
            cpu_limit: 0.5,
            pids_limit: 64,
        }
    }

    #[test]
    fn test_append_bounded() {
        let mut buf = String::new();
        assert!(!append_bounded(&mut buf, b"hello", 8));
        assert!(append_bounded(&mut buf, b" world", 8));
        assert_eq!(buf, "hello wo");
        assert!(append_bounded(&mut buf, b"more", 8));
        assert_eq!(buf, "hello wo");
    }

    #[test]
    fn test_append_bounded_respects_char_boundaries() {
        let mut buf = String::new();
        // 'é' is two bytes; a 4-byte budget cannot hold "aéé"
        assert!(append_bounded(&mut buf, "aéé".as_bytes(), 4));
        assert_eq!(buf, "aé");
    }

    #[test]
    fn test_launch_script_interpreted() {
        let script = launch_script(&python(), 42);
        assert!(script.starts_with("cd /sandbox && cat > payload"));
        assert!(script.contains("head -c 42 payload > main.py"));
        assert!(script.contains("tail -c +43 payload > input.txt"));
        assert!(script.ends_with("exec python3 -u main.py < input.txt"));
    }

    #[test]
    fn test_launch_script_stays_small_for_large_payloads() {
        let source = "x".repeat(MAX_SOURCE_CODE_BYTES);
        let input = "1 ".repeat(MAX_TEST_INPUT_BYTES / 2);
        let script = launch_script(&python(), source.len());
        // The command line carries only byte counts, never payload bytes
        assert!(script.len() < 512);
        assert!(!script.contains("xxxx"));
        assert_eq!(stdin_payload(&source, &input).len(), source.len() + input.len());
    }

    #[test]
    fn test_stdin_payload_splits_at_source_length() {
        let source = "print(input())\n";
        let input = "héllo\n";
        let payload = stdin_payload(source, input);
        assert_eq!(&payload[..source.len()], source.as_bytes());
        assert_eq!(&payload[source.len()..], input.as_bytes());
    }

    #[tokio::test]
    async fn test_feed_stdin_writes_everything_then_closes() {
        let payload = vec![b'7'; 300 * 1024];
        let (writer, mut reader) = tokio::io::duplex(8 * 1024);

        let reading = tokio::spawn(async move {
            let mut received = Vec::new();
            tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut received).await.unwrap();
            received
        });
        feed_stdin(writer, &payload).await.unwrap();

        assert_eq!(reading.await.unwrap(), payload);
    }

    #[test]
    fn test_launch_script_compiled() {
        let mut java = python();
        java.source_file = "Main.java".to_string();
        java.compile = Some("javac Main.java".to_string());
        java.run = "java Main".to_string();
        let script = launch_script(&java, 100);
        assert!(script.contains("&& javac Main.java 1>&2 && exec java Main < input.txt"));
    }

    #[test]
    fn test_host_config_is_locked_down() {
        let host = host_config(&python());
        assert_eq!(host.memory, Some(256 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.nano_cpus, Some(500_000_000));
        assert_eq!(host.pids_limit, Some(64));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(host.readonly_rootfs, Some(true));
        assert!(host.tmpfs.unwrap().contains_key("/sandbox"));
    }
}
