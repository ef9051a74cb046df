//! Cursor CLI backend: spawns the `agent` executable with the prompt as
//! an argument, merges stderr into stdout through a single pipe so line
//! order is the child's true write order, streams that one stream line
//! by line into both an in-memory buffer and a per-call log file, and
//! classifies failures.

use super::{InvokeRequest, LlmClient};
use crate::errors::OrchestratorError;
use async_trait::async_trait;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

pub struct CursorCliClient {
    command: String,
    working_dir: PathBuf,
    output_format: String,
    timeout: Duration,
}

impl CursorCliClient {
    pub fn new(working_dir: impl Into<PathBuf>, output_format: impl Into<String>) -> Self {
        Self {
            command: "agent".to_string(),
            working_dir: working_dir.into(),
            output_format: output_format.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the CLI executable (tests point this at a stub script).
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn classify_exit(&self, code: i32, output: &str) -> OrchestratorError {
        let lowered = output.to_lowercase();
        if lowered.contains("rate limit") || output.contains("429") {
            OrchestratorError::RateLimit {
                message: format!("{} rate limit: {}", self.command, trimmed(output)),
            }
        } else if lowered.contains("timeout") {
            OrchestratorError::Timeout {
                seconds: self.timeout.as_secs(),
                source: None,
            }
        } else {
            OrchestratorError::Llm {
                message: format!("{} exited with code {code}: {}", self.command, trimmed(output)),
                source: None,
            }
        }
    }
}

#[async_trait]
impl LlmClient for CursorCliClient {
    async fn invoke(&self, request: InvokeRequest) -> Result<String, OrchestratorError> {
        if !self.working_dir.is_dir() {
            return Err(OrchestratorError::Config {
                message: format!(
                    "working directory does not exist: {} (check TARGET_PROJECT / PROJECT_ROOT)",
                    self.working_dir.display()
                ),
                source: None,
            });
        }

        // One pipe, both child fds: stdout and stderr write to the same
        // pipe so the kernel, not task scheduling, fixes line order.
        let (pipe_reader, pipe_writer) = std::io::pipe().map_err(|e| OrchestratorError::Llm {
            message: format!("failed to create output pipe: {e}"),
            source: Some(Box::new(e)),
        })?;
        let stderr_writer = pipe_writer.try_clone().map_err(|e| OrchestratorError::Llm {
            message: format!("failed to clone output pipe: {e}"),
            source: Some(Box::new(e)),
        })?;

        let mut command = Command::new(&self.command);
        command
            .arg("-p")
            .arg(&request.prompt)
            .arg("--output-format")
            .arg(&self.output_format);
        if let Some(mode) = request.mode.mode_flag() {
            command.arg("--mode").arg(mode);
        }
        if let Some(model) = &request.model {
            command.arg("--model").arg(model);
        }
        command
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(pipe_writer))
            .stderr(Stdio::from(stderr_writer))
            .kill_on_drop(true);

        debug!(
            mode = request.mode.as_str(),
            model = request.model.as_deref().unwrap_or("default"),
            prompt_len = request.prompt.len(),
            "spawning LLM CLI"
        );

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OrchestratorError::MissingTool {
                    tool: self.command.clone(),
                    message: "install with: curl https://cursor.com/install -fsS | bash".into(),
                }
            } else {
                OrchestratorError::Llm {
                    message: format!("failed to spawn {}: {e}", self.command),
                    source: Some(Box::new(e)),
                }
            }
        })?;
        // The command still holds the parent's copies of the write ends;
        // drop it so the reader sees EOF when the child exits.
        drop(command);

        let sink = OutputSink::new(request.log_path.as_deref());
        let reader_sink = sink.clone();
        let reader = tokio::task::spawn_blocking(move || {
            let lines = BufReader::new(pipe_reader).lines();
            for line in lines.map_while(Result::ok) {
                reader_sink.push(line);
            }
        });

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(OrchestratorError::Llm {
                    message: format!("failed waiting for {}: {e}", self.command),
                    source: Some(Box::new(e)),
                });
            }
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "failed to kill timed-out LLM process");
                }
                sink.push(format!("[{} timed out]", self.command));
                return Err(OrchestratorError::Timeout {
                    seconds: self.timeout.as_secs(),
                    source: None,
                });
            }
        };

        let _ = reader.await;
        let output = sink.collected();

        match status.code() {
            Some(0) => Ok(output),
            Some(code) => Err(self.classify_exit(code, &output)),
            None => Err(OrchestratorError::Llm {
                message: format!("{} terminated by signal", self.command),
                source: None,
            }),
        }
    }
}

/// Accumulator for the merged output stream, mirroring each line into
/// the per-call log file when one was requested.
#[derive(Clone)]
struct OutputSink {
    lines: Arc<Mutex<Vec<String>>>,
    log: Arc<Mutex<Option<std::fs::File>>>,
}

impl OutputSink {
    fn new(log_path: Option<&std::path::Path>) -> Self {
        let log = log_path.and_then(|path| {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match std::fs::File::create(path) {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot open LLM call log");
                    None
                }
            }
        });
        Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            log: Arc::new(Mutex::new(log)),
        }
    }

    fn push(&self, line: String) {
        if let Some(file) = self.log.lock().unwrap().as_mut() {
            use std::io::Write;
            let _ = writeln!(file, "{line}");
        }
        self.lines.lock().unwrap().push(line);
    }

    fn collected(&self) -> String {
        self.lines.lock().unwrap().join("\n")
    }
}

fn trimmed(output: &str) -> &str {
    crate::util::truncate_chars(output.trim(), 500)
}

/// Build the per-call log path for a role invocation.
pub fn call_log_path(log_dir: &std::path::Path, agent_name: &str) -> PathBuf {
    log_dir.join(format!(
        "agent_{agent_name}_{}.log",
        crate::util::now_compact()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::InvokeMode;
    use tempfile::TempDir;

    /// Write an executable stub standing in for the CLI.
    #[cfg(unix)]
    fn stub_cli(dir: &TempDir, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("agent-stub");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn request(prompt: &str) -> InvokeRequest {
        InvokeRequest {
            prompt: prompt.into(),
            mode: InvokeMode::Agent,
            model: None,
            log_path: None,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn success_returns_collected_output() {
        let dir = TempDir::new().unwrap();
        let cli = stub_cli(&dir, "echo line-one\necho line-two >&2\nexit 0");
        let client = CursorCliClient::new(dir.path(), "text").with_command(cli);

        let output = client.invoke(request("do something")).await.unwrap();
        assert!(output.contains("line-one"));
        assert!(output.contains("line-two"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdout_and_stderr_keep_write_order() {
        let dir = TempDir::new().unwrap();
        let cli = stub_cli(
            &dir,
            "echo first-out\necho second-err >&2\necho third-out\nexit 0",
        );
        let client = CursorCliClient::new(dir.path(), "text").with_command(cli);

        let output = client.invoke(request("go")).await.unwrap();
        assert_eq!(output, "first-out\nsecond-err\nthird-out");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_streams_into_call_log() {
        let dir = TempDir::new().unwrap();
        let cli = stub_cli(&dir, "echo streamed\nexit 0");
        let client = CursorCliClient::new(dir.path(), "text").with_command(cli);

        let log_path = dir.path().join("logs/call.log");
        let mut req = request("go");
        req.log_path = Some(log_path.clone());
        client.invoke(req).await.unwrap();

        let logged = std::fs::read_to_string(&log_path).unwrap();
        assert!(logged.contains("streamed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rate_limit_output_classifies_as_rate_limit() {
        let dir = TempDir::new().unwrap();
        let cli = stub_cli(&dir, "echo 'Rate limit exceeded (429)'\nexit 1");
        let client = CursorCliClient::new(dir.path(), "text").with_command(cli);

        let err = client.invoke(request("go")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::RateLimit { .. }));
        assert!(err.is_retryable());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_message_classifies_as_timeout() {
        let dir = TempDir::new().unwrap();
        let cli = stub_cli(&dir, "echo 'request timeout while contacting backend'\nexit 1");
        let client = CursorCliClient::new(dir.path(), "text").with_command(cli);

        let err = client.invoke(request("go")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn other_failures_are_generic_llm_errors() {
        let dir = TempDir::new().unwrap();
        let cli = stub_cli(&dir, "echo 'something broke'\nexit 3");
        let client = CursorCliClient::new(dir.path(), "text").with_command(cli);

        let err = client.invoke(request("go")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Llm { .. }));
        assert!(err.is_retryable());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn wall_clock_timeout_kills_the_process() {
        let dir = TempDir::new().unwrap();
        let cli = stub_cli(&dir, "sleep 30");
        let client = CursorCliClient::new(dir.path(), "text")
            .with_command(cli)
            .with_timeout(Duration::from_millis(200));

        let err = client.invoke(request("go")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout { .. }));
    }

    #[tokio::test]
    async fn missing_tool_is_fatal() {
        let dir = TempDir::new().unwrap();
        let client =
            CursorCliClient::new(dir.path(), "text").with_command("maestro-no-such-cli-xyz");

        let err = client.invoke(request("go")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::MissingTool { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn missing_working_dir_is_fatal_config() {
        let client = CursorCliClient::new("/definitely/not/a/real/dir", "text");
        let err = client.invoke(request("go")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Config { .. }));
        assert!(!err.is_retryable());
    }
}
