//! Child process execution with captured output.

use std::path::PathBuf;
use std::process::Stdio;

use mocbot_ci_core::delegate::Step;
use mocbot_ci_core::output::{CapturedOutput, LogLine, LogStream};
use mocbot_ci_core::{Error, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Maximum line length kept from a child's output (64 KB).
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// A command to run as one pipeline step.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment for the child. Values are never logged.
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run the child in `dir`.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

/// Run a command to completion.
///
/// Stdout and stderr are captured in arrival order. A non-zero exit is
/// [`Error::StepFailed`] carrying the combined output. The child is killed
/// if the returned future is dropped.
pub async fn run_command(spec: &CommandSpec, step: Step) -> Result<CapturedOutput> {
    info!(%step, program = %spec.program, args = ?spec.args, "Running command");

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.current_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::ExecutionFailed(format!("Failed to run {}: {}", spec.program, e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Internal("stdout pipe not available".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Internal("stderr pipe not available".to_string()))?;

    let (tx, mut rx) = mpsc::channel(256);
    let stdout_task = tokio::spawn(forward_lines(BufReader::new(stdout), LogStream::Stdout, tx.clone()));
    let stderr_task = tokio::spawn(forward_lines(BufReader::new(stderr), LogStream::Stderr, tx));

    let mut output = CapturedOutput::default();
    while let Some(line) = rx.recv().await {
        debug!(%step, "{}", line.content);
        output.push(line);
    }
    for (stream, task) in [(LogStream::Stdout, stdout_task), (LogStream::Stderr, stderr_task)] {
        if let Err(e) = join_reader(stream, task).await {
            warn!(%step, error = %e, "Output may be incomplete");
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| Error::ExecutionFailed(format!("Failed to wait for {}: {}", spec.program, e)))?;
    output.exit_code = status.code().map(i64::from);

    if output.success() {
        Ok(output)
    } else {
        Err(Error::StepFailed {
            step,
            exit_code: output.exit_code,
            output: output.combined(),
        })
    }
}

async fn join_reader(stream: LogStream, task: JoinHandle<()>) -> Result<()> {
    task.await
        .map_err(|e| Error::Internal(format!("{:?} reader failed: {}", stream, e)))
}

async fn forward_lines<R>(mut reader: R, stream: LogStream, tx: mpsc::Sender<LogLine>)
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if line.len() > MAX_LINE_LENGTH {
                    let mut end = MAX_LINE_LENGTH;
                    while !line.is_char_boundary(end) {
                        end -= 1;
                    }
                    line.truncate(end);
                    line.push_str("... [truncated]");
                }
                let content = line.trim_end_matches(['\r', '\n']);
                if tx.send(LogLine::new(stream, content)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("error reading {:?}: {}", stream, e);
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_captures_both_streams() {
        let output = run_command(&sh("echo out; echo err >&2; echo out2"), Step::Build)
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout(), "out\nout2\n");
        assert!(output.combined().contains("err\n"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_step_failure() {
        let err = run_command(&sh("echo 'compile error' >&2; exit 3"), Step::Build)
            .await
            .unwrap_err();

        match err {
            Error::StepFailed {
                step,
                exit_code,
                output,
            } => {
                assert_eq!(step, Step::Build);
                assert_eq!(exit_code, Some(3));
                assert!(output.contains("compile error"));
            }
            other => panic!("Expected StepFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_env_is_passed_to_child() {
        let spec = sh("printf '%s' \"$MOCBOT_TEST_VALUE\"").env("MOCBOT_TEST_VALUE", "from-env");
        let output = run_command(&spec, Step::Build).await.unwrap();
        assert_eq!(output.stdout(), "from-env\n");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run_command(&CommandSpec::new("mocbot-ci-no-such-binary"), Step::Build)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(_)));
    }

    #[tokio::test]
    async fn test_current_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "").unwrap();
        let spec = sh("ls").current_dir(dir.path());

        let output = run_command(&spec, Step::Build).await.unwrap();
        assert!(output.stdout().contains("marker"));
    }

    #[tokio::test]
    async fn test_failed_reader_is_reported() {
        let finished = tokio::spawn(async {});
        assert!(join_reader(LogStream::Stdout, finished).await.is_ok());

        let panicked = tokio::spawn(async { panic!("reader blew up"); });
        let err = join_reader(LogStream::Stderr, panicked).await.unwrap_err();
        assert!(matches!(err, Error::Internal(ref m) if m.contains("Stderr")));
    }
}
