//! External command execution.
//!
//! Every tool the service drives (`mkdir`, `wget`, `import`, `packages`,
//! `git`, `make`, `apt-get`, `crontab`, `gpg`) goes through a
//! [`CommandRunner`]. A non-zero exit is always an error; nothing here
//! retries.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::CommandFailure;

/// Privilege context a command runs under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecIdentity {
    /// Whatever identity the current process has.
    Current,
    /// Elevated caller drops to `user` (`sudo -u <user> ...`).
    ElevatedThenDropped { user: String },
    /// Login-shell switch to `user` (`su -c "..." <user>`).
    LoginShell { user: String },
}

/// One external command, fully described.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub identity: ExecIdentity,
    pub cwd: Option<PathBuf>,
    /// Bytes written to the child's stdin
    pub input: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl CommandInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            identity: ExecIdentity::Current,
            cwd: None,
            input: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn identity(mut self, identity: ExecIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The argv actually executed once the identity is applied.
    pub fn argv(&self) -> Vec<String> {
        match &self.identity {
            ExecIdentity::Current => std::iter::once(self.program.clone())
                .chain(self.args.iter().cloned())
                .collect(),
            ExecIdentity::ElevatedThenDropped { user } => {
                let mut argv = vec!["sudo".to_string(), "-u".to_string(), user.clone()];
                argv.push(self.program.clone());
                argv.extend(self.args.iter().cloned());
                argv
            }
            ExecIdentity::LoginShell { user } => {
                let script = std::iter::once(self.program.as_str())
                    .chain(self.args.iter().map(String::as_str))
                    .map(shell_quote)
                    .collect::<Vec<_>>()
                    .join(" ");
                vec!["su".to_string(), "-c".to_string(), script, user.clone()]
            }
        }
    }
}

impl fmt::Display for CommandInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=+:@%,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Output of a command that exited zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// stdout followed by stderr
    pub output: String,
}

/// Executes [`CommandInvocation`]s.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput, CommandFailure>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput, CommandFailure> {
        let result = execute(invocation).await;
        if let Err(failure) = &result {
            debug!(
                command = %invocation,
                output = failure.output(),
                "command failed: {failure}"
            );
        }
        result
    }
}

async fn execute(invocation: &CommandInvocation) -> Result<CommandOutput, CommandFailure> {
    let argv = invocation.argv();
    debug!(command = %invocation, "running");

    let mut command = Command::new(&argv[0]);
    command
        .args(&argv[1..])
        .stdin(if invocation.input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &invocation.cwd {
        command.current_dir(cwd);
    }

    let mut child = command.spawn().map_err(|e| CommandFailure::Spawn {
        program: invocation.program.clone(),
        reason: e.to_string(),
    })?;

    if let (Some(mut stdin), Some(input)) = (child.stdin.take(), invocation.input.clone()) {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&input).await {
                debug!("writing stdin failed: {e}");
            }
        });
    }

    let stdout = Capture::spawn(child.stdout.take());
    let stderr = Capture::spawn(child.stderr.take());

    let waited = match invocation.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(waited) => Some(waited),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    debug!("killing timed out command failed: {e}");
                }
                None
            }
        },
        None => Some(child.wait().await),
    };

    // A killed child may leave grandchildren holding the pipes open.
    let drain = waited.is_none().then_some(DRAIN_AFTER_KILL);
    let mut combined = stdout.finish(drain).await;
    combined.push_str(&stderr.finish(drain).await);

    let status = match waited {
        None => {
            return Err(CommandFailure::TimedOut {
                program: invocation.program.clone(),
                limit: invocation.timeout.unwrap_or_default(),
                output: combined,
            })
        }
        Some(waited) => waited.map_err(|e| CommandFailure::Spawn {
            program: invocation.program.clone(),
            reason: e.to_string(),
        })?,
    };

    if status.success() {
        Ok(CommandOutput { output: combined })
    } else {
        Err(CommandFailure::Exited {
            program: invocation.program.clone(),
            status: status.code(),
            output: combined,
        })
    }
}

/// How long to keep reading output after killing a timed out command.
const DRAIN_AFTER_KILL: Duration = Duration::from_secs(1);

/// Background reader collecting one output stream of a child.
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl Capture {
    fn spawn<R>(stream: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let task = stream.map(|mut stream| {
            let buf = Arc::clone(&buf);
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if let Ok(mut collected) = buf.lock() {
                                collected.extend_from_slice(&chunk[..n]);
                            }
                        }
                    }
                }
            })
        });
        Self { buf, task }
    }

    /// Wait for the stream to close (at most `grace`, if given) and return
    /// what was read.
    async fn finish(mut self, grace: Option<Duration>) -> String {
        if let Some(mut task) = self.task.take() {
            match grace {
                Some(grace) => {
                    if tokio::time::timeout(grace, &mut task).await.is_err() {
                        task.abort();
                    }
                }
                None => {
                    let _ = task.await;
                }
            }
        }
        let collected = self.buf.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&collected).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argv_current_identity() {
        let inv = CommandInvocation::new("mkdir").arg("/home/ubuntu/noble");
        assert_eq!(inv.argv(), vec!["mkdir", "/home/ubuntu/noble"]);
    }

    #[test]
    fn test_argv_elevated_then_dropped() {
        let inv = CommandInvocation::new("git")
            .args(["-C", "/home/ubuntu/langpack-o-matic", "pull"])
            .identity(ExecIdentity::ElevatedThenDropped {
                user: "ubuntu".to_string(),
            });
        assert_eq!(
            inv.argv(),
            vec!["sudo", "-u", "ubuntu", "git", "-C", "/home/ubuntu/langpack-o-matic", "pull"]
        );
    }

    #[test]
    fn test_argv_login_shell_quotes_words() {
        let inv = CommandInvocation::new("crontab")
            .arg("my crontab")
            .identity(ExecIdentity::LoginShell {
                user: "ubuntu".to_string(),
            });
        assert_eq!(inv.argv(), vec!["su", "-c", "crontab 'my crontab'", "ubuntu"]);

        let removal = CommandInvocation::new("crontab")
            .arg("-r")
            .identity(ExecIdentity::LoginShell {
                user: "ubuntu".to_string(),
            });
        assert_eq!(removal.argv(), vec!["su", "-c", "crontab -r", "ubuntu"]);
    }

    #[test]
    fn test_shell_quote_escapes_single_quote() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("--treshold=10"), "--treshold=10");
    }

    #[tokio::test]
    async fn test_run_captures_stdout_and_stderr() {
        let inv = CommandInvocation::new("sh").args(["-c", "echo out; echo err >&2"]);
        let out = ProcessRunner::new().run(&inv).await.expect("sh should succeed");
        assert!(out.output.contains("out"));
        assert!(out.output.contains("err"));
    }

    #[tokio::test]
    async fn test_run_nonzero_exit_is_failure_with_output() {
        let inv = CommandInvocation::new("sh").args(["-c", "echo broken >&2; exit 3"]);
        let failure = ProcessRunner::new().run(&inv).await.unwrap_err();
        match failure {
            CommandFailure::Exited {
                program,
                status,
                output,
            } => {
                assert_eq!(program, "sh");
                assert_eq!(status, Some(3));
                assert!(output.contains("broken"));
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_missing_program_is_spawn_failure() {
        let inv = CommandInvocation::new("definitely-not-a-real-tool-xyz");
        let failure = ProcessRunner::new().run(&inv).await.unwrap_err();
        assert!(matches!(failure, CommandFailure::Spawn { .. }));
        assert!(!failure.output().is_empty());
    }

    #[tokio::test]
    async fn test_run_feeds_stdin() {
        let inv = CommandInvocation::new("cat").stdin("key material");
        let out = ProcessRunner::new().run(&inv).await.unwrap();
        assert_eq!(out.output, "key material");
    }

    #[tokio::test]
    async fn test_run_honours_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let inv = CommandInvocation::new("pwd").current_dir(dir.path());
        let out = ProcessRunner::new().run(&inv).await.unwrap();
        let reported = std::fs::canonicalize(out.output.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let inv = CommandInvocation::new("sleep")
            .arg("5")
            .timeout(Some(Duration::from_millis(100)));
        let failure = ProcessRunner::new().run(&inv).await.unwrap_err();
        assert!(matches!(failure, CommandFailure::TimedOut { .. }));
        assert!(failure.to_string().contains("100ms"), "{failure}");
    }

    #[tokio::test]
    async fn test_timed_out_command_keeps_partial_output() {
        let inv = CommandInvocation::new("sh")
            .args(["-c", "echo fetching; echo slow mirror >&2; exec sleep 5"])
            .timeout(Some(Duration::from_millis(300)));
        let failure = ProcessRunner::new().run(&inv).await.unwrap_err();

        match &failure {
            CommandFailure::TimedOut { limit, output, .. } => {
                assert_eq!(*limit, Duration::from_millis(300));
                assert!(output.contains("fetching"), "output: {output:?}");
                assert!(output.contains("slow mirror"), "output: {output:?}");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(failure.output(), "fetching\nslow mirror\n");
    }
}
